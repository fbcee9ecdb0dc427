//! The acquisition state machine.
//!
//! A [`Tracker`] owns every acquisition resource: the positioning
//! subscription, the liveness indicator and the store handle. It runs as a
//! single task and is driven through a cloneable [`TrackerHandle`]:
//!
//! - Commands (`start`, `pause`, `log_now`, ...) arrive over a channel and are
//!   answered through a oneshot reply
//! - Fixes arrive from the [`PositioningSource`] subscription
//! - A timer drives the duty cycle and the logging deadline
//!
//! Because all three are handled by one `tokio::select!` loop, transitions
//! are serialized and cancellation only takes effect between steps.
//!
//! # Lifecycle
//!
//! ```text
//! not_initialized ─activate─▶ permissions_needed ─grant─▶ ready
//!                                                          │ start
//!            ┌──────────── restart ── error ◀─fault─┐      ▼
//!            │                                      ├── starting ──▶ active ◀─resume─┐
//!            └──────────────────────────────────────┘                 │ pause  ──▶ paused
//!                                                                     │ stop
//!                                                 stopped ◀─ stopping ┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use waymark_types::{EntrySource, LocationFix, PerformanceMode, RadioPosture, TrackingState};

use crate::SharedStore;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, GapReason, TrackerEvent};
use crate::indicator::{IndicatorStatus, LivenessIndicator};
use crate::positioning::{PositionEvent, PositioningSource, UpdateRequest};
use crate::quality;
use crate::sampler::{AdaptiveSampler, DutyPhase, Observation};
use crate::settings::{SettingsHandle, TrackingSettings};
use crate::threshold::ThresholdEvaluator;

const COMMAND_CAPACITY: usize = 32;
const MIN_POLL: Duration = Duration::from_millis(10);

/// Snapshot of the tracker, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub state: TrackingState,
    pub mode: PerformanceMode,
    pub timeline_logging: bool,
    /// Duty-cycle phase while acquiring.
    pub phase: Option<DutyPhase>,
    /// Posture last requested from the radio while acquiring.
    pub posture: Option<RadioPosture>,
    /// Most recent fix that passed the quality gate.
    pub last_fix: Option<LocationFix>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_logged_at: Option<OffsetDateTime>,
    /// Message of the fault that moved the tracker to `error`.
    pub last_error: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum Command {
    Activate(Reply<TrackingState>),
    GrantPermissions(Reply<TrackingState>),
    Start(Reply<TrackingState>),
    Stop(Reply<TrackingState>),
    Pause(Reply<TrackingState>),
    Resume(Reply<TrackingState>),
    Restart(Reply<TrackingState>),
    SetMode(PerformanceMode, Reply<()>),
    SetTimelineLogging(bool, Reply<()>),
    LogNow(Reply<i64>),
}

/// Cloneable handle for commanding and observing a [`Tracker`].
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    events: EventDispatcher,
    status: watch::Receiver<TrackerStatus>,
}

impl TrackerHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::TrackerClosed)?;
        rx.await.map_err(|_| Error::TrackerClosed)?
    }

    /// Initialize the service: `not_initialized` → `permissions_needed`.
    pub async fn activate(&self) -> Result<TrackingState> {
        self.request(Command::Activate).await
    }

    /// Report that location permission was granted: → `ready`.
    pub async fn grant_permissions(&self) -> Result<TrackingState> {
        self.request(Command::GrantPermissions).await
    }

    /// Start acquisition from `ready` or `stopped`.
    pub async fn start(&self) -> Result<TrackingState> {
        self.request(Command::Start).await
    }

    /// Stop acquisition and release every resource.
    pub async fn stop(&self) -> Result<TrackingState> {
        self.request(Command::Stop).await
    }

    /// Pause acquisition, releasing the radio.
    pub async fn pause(&self) -> Result<TrackingState> {
        self.request(Command::Pause).await
    }

    /// Resume a paused tracker.
    pub async fn resume(&self) -> Result<TrackingState> {
        self.request(Command::Resume).await
    }

    /// Restart after a fault.
    pub async fn restart(&self) -> Result<TrackingState> {
        self.request(Command::Restart).await
    }

    /// Switch the performance mode. Takes effect immediately.
    pub async fn set_performance_mode(&self, mode: PerformanceMode) -> Result<()> {
        self.request(|tx| Command::SetMode(mode, tx)).await
    }

    /// Enable or disable writing automatic rows.
    ///
    /// With logging disabled fixes are still evaluated and broadcast. When
    /// logging is turned back on, the distance threshold is measured from the
    /// last automatic row still headed for the endpoint.
    pub async fn set_timeline_logging(&self, enabled: bool) -> Result<()> {
        self.request(|tx| Command::SetTimelineLogging(enabled, tx))
            .await
    }

    /// Record the latest fix as a manual entry, bypassing thresholds.
    ///
    /// Returns the new row id.
    pub async fn log_now(&self) -> Result<i64> {
        self.request(Command::LogNow).await
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Current status snapshot.
    pub fn status(&self) -> TrackerStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<TrackerStatus> {
        self.status.clone()
    }
}

/// Acquisition state machine task.
pub struct Tracker {
    commands: mpsc::Receiver<Command>,
    positioning: Arc<dyn PositioningSource>,
    indicator: Arc<dyn LivenessIndicator>,
    store_source: SharedStore,
    /// Held only between a successful start and stop/fault.
    store: Option<SharedStore>,
    settings: SettingsHandle,
    clock: Clock,
    events: EventDispatcher,
    status: watch::Sender<TrackerStatus>,
    state: TrackingState,
    timeline_logging: bool,
    sampler: AdaptiveSampler,
    evaluator: ThresholdEvaluator,
    fixes: Option<broadcast::Receiver<PositionEvent>>,
    requested: Option<(DutyPhase, RadioPosture)>,
    next_tick: Instant,
    last_fix: Option<LocationFix>,
    last_logged_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

impl Tracker {
    /// Create a tracker and its handle.
    ///
    /// The tracker starts in `not_initialized`, Normal mode, with timeline
    /// logging enabled. Nothing happens until [`run`](Self::run) is polled.
    pub fn new(
        positioning: Arc<dyn PositioningSource>,
        indicator: Arc<dyn LivenessIndicator>,
        store: SharedStore,
        settings: SettingsHandle,
    ) -> (Self, TrackerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = EventDispatcher::default();
        let (status_tx, status_rx) = watch::channel(TrackerStatus {
            state: TrackingState::NotInitialized,
            mode: PerformanceMode::Normal,
            timeline_logging: true,
            phase: None,
            posture: None,
            last_fix: None,
            last_logged_at: None,
            last_error: None,
        });

        let tracker = Self {
            commands: command_rx,
            positioning,
            indicator,
            store_source: store,
            store: None,
            settings,
            clock: Clock::system(),
            events: events.clone(),
            status: status_tx,
            state: TrackingState::NotInitialized,
            timeline_logging: true,
            sampler: AdaptiveSampler::new(PerformanceMode::Normal),
            evaluator: ThresholdEvaluator::new(),
            fixes: None,
            requested: None,
            next_tick: Instant::now(),
            last_fix: None,
            last_logged_at: None,
            last_error: None,
        };
        let handle = TrackerHandle {
            commands: command_tx,
            events,
            status: status_rx,
        };
        (tracker, handle)
    }

    /// Use `clock` for wall-clock time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start in `mode` instead of Normal.
    pub fn with_mode(mut self, mode: PerformanceMode) -> Self {
        self.sampler.set_mode(mode);
        self.publish_status();
        self
    }

    /// Start with timeline logging enabled or disabled.
    pub fn with_timeline_logging(mut self, enabled: bool) -> Self {
        self.timeline_logging = enabled;
        self.publish_status();
        self
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until cancelled or every handle is dropped.
    ///
    /// On exit any running acquisition is stopped and its resources released.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Tracker started");

        loop {
            let acquiring = self.state.is_acquiring();
            let next_tick = self.next_tick;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Tracker cancelled, shutting down");
                    break;
                }
                event = next_position(&mut self.fixes), if acquiring => {
                    self.on_position_event(event).await;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("All tracker handles dropped, shutting down");
                            break;
                        }
                    }
                }
                _ = sleep_until(next_tick), if acquiring => {
                    self.on_tick().await;
                }
            }
        }

        if matches!(
            self.state,
            TrackingState::Active | TrackingState::Paused | TrackingState::Starting
        ) {
            self.shut_down().await;
        }
        info!("Tracker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "Handling tracker command");

        match command {
            Command::Activate(reply) => {
                let _ = reply.send(self.activate());
            }
            Command::GrantPermissions(reply) => {
                let _ = reply.send(self.grant_permissions());
            }
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = self.pause().await;
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let result = self.resume().await;
                let _ = reply.send(result);
            }
            Command::Restart(reply) => {
                let result = self.restart().await;
                let _ = reply.send(result);
            }
            Command::SetMode(mode, reply) => {
                let result = self.set_mode(mode).await;
                let _ = reply.send(result);
            }
            Command::SetTimelineLogging(enabled, reply) => {
                let result = self.set_timeline_logging(enabled).await;
                let _ = reply.send(result);
            }
            Command::LogNow(reply) => {
                let result = self.log_now().await;
                let _ = reply.send(result);
            }
        }
    }

    fn refuse<T>(&self, command: &'static str) -> Result<T> {
        debug!("Refusing {} while {}", command, self.state);
        Err(Error::InvalidCommand {
            command,
            state: self.state,
        })
    }

    fn activate(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::NotInitialized => {
                self.set_state(TrackingState::PermissionsNeeded);
                Ok(self.state)
            }
            TrackingState::PermissionsNeeded => Ok(self.state),
            _ => self.refuse("activate"),
        }
    }

    fn grant_permissions(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::PermissionsNeeded => {
                self.set_state(TrackingState::Ready);
                Ok(self.state)
            }
            TrackingState::Ready => Ok(self.state),
            _ => self.refuse("grant permissions"),
        }
    }

    async fn start(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::Ready | TrackingState::Stopped => self.bring_up().await,
            TrackingState::Active => Ok(self.state),
            _ => self.refuse("start"),
        }
    }

    async fn restart(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::Error | TrackingState::Stopped => {
                self.last_error = None;
                self.bring_up().await
            }
            _ => self.refuse("restart"),
        }
    }

    /// `starting` → `active`, or `error` on the first failing step.
    async fn bring_up(&mut self) -> Result<TrackingState> {
        self.set_state(TrackingState::Starting);

        match self.engage().await {
            Ok(()) => {
                self.set_state(TrackingState::Active);
                Ok(self.state)
            }
            Err(e) => {
                self.fault(&e).await;
                Err(e)
            }
        }
    }

    /// Ordered start sequence: store, indicator, then radio.
    async fn engage(&mut self) -> Result<()> {
        let store = Arc::clone(&self.store_source);
        store.lock().await.ping()?;
        self.store = Some(store);

        self.indicator.show(IndicatorStatus::Starting).await?;

        self.fixes = Some(self.positioning.subscribe());
        self.requested = None;
        self.ensure_window();
        self.apply_plan().await?;

        self.indicator
            .show(IndicatorStatus::Tracking {
                mode: self.sampler.mode(),
            })
            .await?;
        info!("Acquisition engaged in {} mode", self.sampler.mode());
        Ok(())
    }

    async fn pause(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::Active => {
                self.release_radio().await;
                if let Err(e) = self.indicator.show(IndicatorStatus::Paused).await {
                    self.fault(&e).await;
                    return Err(e);
                }
                self.set_state(TrackingState::Paused);
                Ok(self.state)
            }
            TrackingState::Paused => Ok(self.state),
            _ => self.refuse("pause"),
        }
    }

    async fn resume(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::Paused => {
                self.fixes = Some(self.positioning.subscribe());
                self.requested = None;
                if let Err(e) = self.reengage().await {
                    self.fault(&e).await;
                    return Err(e);
                }
                self.set_state(TrackingState::Active);
                Ok(self.state)
            }
            TrackingState::Active => Ok(self.state),
            _ => self.refuse("resume"),
        }
    }

    /// Re-plan the radio and refresh the indicator after a pause or mode switch.
    async fn reengage(&mut self) -> Result<()> {
        self.ensure_window();
        self.apply_plan().await?;
        self.indicator
            .show(IndicatorStatus::Tracking {
                mode: self.sampler.mode(),
            })
            .await
    }

    async fn stop(&mut self) -> Result<TrackingState> {
        match self.state {
            TrackingState::Active | TrackingState::Paused => {
                self.shut_down().await;
                Ok(self.state)
            }
            TrackingState::Stopped => Ok(self.state),
            _ => self.refuse("stop"),
        }
    }

    /// `stopping` → `stopped`, releasing radio, indicator and store.
    async fn shut_down(&mut self) {
        self.set_state(TrackingState::Stopping);
        self.release_radio().await;
        if let Err(e) = self.indicator.retract().await {
            warn!("Failed to retract liveness indicator: {}", e);
        }
        self.store = None;
        self.set_state(TrackingState::Stopped);
    }

    async fn release_radio(&mut self) {
        self.fixes = None;
        self.requested = None;
        if let Err(e) = self.positioning.stop_updates().await {
            warn!("Failed to stop location updates: {}", e);
        }
    }

    /// Move to `error`, releasing what can be released.
    async fn fault(&mut self, err: &Error) {
        let message = err.to_string();
        error!("Tracker fault: {}", message);

        self.release_radio().await;
        if let Err(e) = self
            .indicator
            .show(IndicatorStatus::Faulted {
                message: message.clone(),
            })
            .await
        {
            warn!("Failed to show fault on liveness indicator: {}", e);
        }
        self.store = None;
        self.last_error = Some(message.clone());
        self.events.send(TrackerEvent::Fault { message });
        self.set_state(TrackingState::Error);
    }

    async fn set_mode(&mut self, mode: PerformanceMode) -> Result<()> {
        if mode == self.sampler.mode() {
            return Ok(());
        }
        info!("Switching to {} mode", mode);
        self.sampler.set_mode(mode);
        self.requested = None;

        if self.state == TrackingState::Active
            && let Err(e) = self.reengage().await
        {
            self.fault(&e).await;
            return Err(e);
        }

        self.events.send(TrackerEvent::StateChanged {
            state: self.state,
            mode,
        });
        self.publish_status();
        Ok(())
    }

    async fn log_now(&mut self) -> Result<i64> {
        if !matches!(self.state, TrackingState::Active | TrackingState::Paused) {
            return self.refuse("log now");
        }

        let settings = self.settings.current();
        let fix = self
            .last_fix
            .clone()
            .filter(|fix| quality::accept(fix, settings.accuracy_ceiling_m))
            .ok_or(Error::NoFix)?;

        let now = self.clock.now();
        match self.persist(&fix, EntrySource::Manual, now, &settings).await {
            Ok(id) => {
                info!("Manual entry {} recorded", id);
                self.publish_status();
                Ok(id)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.fault(&e).await;
                }
                Err(e)
            }
        }
    }

    /// Open a fresh wake window when the countdown is missing or already
    /// overdue, so that (re)engaging never produces an immediate gap.
    fn ensure_window(&mut self) {
        if self.sampler.mode() != PerformanceMode::Normal {
            return;
        }
        let settings = self.settings.current();
        let thresholds = settings.thresholds();
        let now = self.clock.now();
        if self.evaluator.anchor().is_none() || self.evaluator.is_due(now, &thresholds) {
            self.evaluator
                .open_window(now, wake_lead(&settings), &thresholds);
        }
    }

    /// Plan the next poll and reconfigure the radio if the posture changed.
    async fn apply_plan(&mut self) -> Result<()> {
        let settings = self.settings.current();
        let thresholds = settings.thresholds();
        let remaining = self
            .evaluator
            .seconds_until_next_log(self.clock.now(), &thresholds);
        let plan = self.sampler.plan(remaining, &settings.duty_cycle);

        let key = (plan.phase, plan.posture);
        if self.requested != Some(key) {
            debug!(
                "Requesting {} updates every {:?} ({:?})",
                plan.posture, plan.poll, plan.phase
            );
            self.positioning
                .request_updates(UpdateRequest::new(plan.posture, plan.poll))
                .await?;
            self.requested = Some(key);
        }

        self.next_tick = Instant::now() + plan.poll.max(MIN_POLL);
        self.publish_status();
        Ok(())
    }

    async fn on_tick(&mut self) {
        if let Err(e) = self.tick().await {
            self.fault(&e).await;
        }
    }

    async fn tick(&mut self) -> Result<()> {
        if self.sampler.mode() == PerformanceMode::Normal {
            let settings = self.settings.current();
            let thresholds = settings.thresholds();
            let now = self.clock.now();

            if self.evaluator.anchor().is_none() {
                self.evaluator
                    .open_window(now, wake_lead(&settings), &thresholds);
            } else if self.evaluator.is_due(now, &thresholds) {
                if self.sampler.phase() == Some(DutyPhase::Wake) {
                    self.on_deadline(now, &settings).await?;
                } else {
                    // Threshold shortened at runtime; give the radio a full window
                    self.evaluator
                        .open_window(now, wake_lead(&settings), &thresholds);
                }
            }
        }

        self.apply_plan().await
    }

    async fn on_deadline(&mut self, now: OffsetDateTime, settings: &TrackingSettings) -> Result<()> {
        let Some(sample) = self.sampler.take_deadline_sample() else {
            info!("No usable fix in wake window, skipping this interval");
            self.evaluator.defer(now);
            self.events.send(TrackerEvent::Gap {
                at: now,
                reason: GapReason::NoFix,
            });
            return Ok(());
        };

        let thresholds = settings.thresholds();
        match self.evaluator.evaluate_at(&sample, now, &thresholds) {
            Some(evaluation) if !evaluation.passes() => {
                debug!(
                    "Deadline sample not logged: {}",
                    evaluation.reason().unwrap_or_default()
                );
                self.evaluator.defer(now);
                self.events.send(TrackerEvent::Gap {
                    at: now,
                    reason: GapReason::Stationary,
                });
            }
            _ => self.log_automatic(sample, now, settings).await?,
        }
        Ok(())
    }

    async fn on_position_event(&mut self, event: std::result::Result<PositionEvent, RecvError>) {
        match event {
            Ok(PositionEvent::Fix(fix)) => {
                if let Err(e) = self.on_fix(fix).await {
                    self.fault(&e).await;
                }
            }
            Ok(PositionEvent::Unavailable(reason)) => {
                self.fault(&Error::PositioningUnavailable(reason)).await;
            }
            Ok(PositionEvent::PermissionRevoked) => {
                self.fault(&Error::PermissionRevoked).await;
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Tracker lagged behind positioning, {} fixes dropped", n);
            }
            Err(RecvError::Closed) => {
                self.fault(&Error::PositioningUnavailable(
                    "positioning stream closed".into(),
                ))
                .await;
            }
        }
    }

    async fn on_fix(&mut self, fix: LocationFix) -> Result<()> {
        let settings = self.settings.current();
        if !quality::accept(&fix, settings.accuracy_ceiling_m) {
            debug!(
                "Discarding fix ±{:.1} m (ceiling {} m)",
                fix.accuracy, settings.accuracy_ceiling_m
            );
            return Ok(());
        }

        self.last_fix = Some(fix.clone());

        match self.sampler.mode() {
            PerformanceMode::Normal => {
                if self.sampler.observe(&fix, &settings.duty_cycle) == Observation::Locked {
                    self.apply_plan().await?;
                }
            }
            PerformanceMode::High | PerformanceMode::PowerSaver => {
                let now = self.clock.now();
                let thresholds = settings.thresholds();
                if self.evaluator.should_log_at(&fix, now, &thresholds) {
                    self.log_automatic(fix.clone(), now, &settings).await?;
                }
            }
        }

        self.events.send(TrackerEvent::Fix { fix });
        self.publish_status();
        Ok(())
    }

    async fn set_timeline_logging(&mut self, enabled: bool) -> Result<()> {
        if self.timeline_logging == enabled {
            return Ok(());
        }
        info!("Timeline logging {}", if enabled { "enabled" } else { "disabled" });
        self.timeline_logging = enabled;

        // Fixes accepted while logging was off have no row; measure distance
        // from the last row headed for the endpoint.
        if enabled && let Some(store) = &self.store {
            let last = store.lock().await.last_deliverable(EntrySource::Automatic)?;
            self.evaluator.rebase(last.map(|row| row.to_fix()));
        }
        self.publish_status();
        Ok(())
    }

    /// Accept `fix` as the new baseline, writing a row if logging is on.
    async fn log_automatic(
        &mut self,
        fix: LocationFix,
        at: OffsetDateTime,
        settings: &TrackingSettings,
    ) -> Result<()> {
        if self.timeline_logging {
            let id = self
                .persist(&fix, EntrySource::Automatic, at, settings)
                .await?;
            debug!(
                "Logged fix {} at ({:.5}, {:.5}) ±{:.1} m",
                id, fix.latitude, fix.longitude, fix.accuracy
            );
        } else {
            debug!("Timeline logging disabled, fix accepted without a row");
        }
        self.evaluator.accept(fix, at);
        Ok(())
    }

    async fn persist(
        &mut self,
        fix: &LocationFix,
        source: EntrySource,
        at: OffsetDateTime,
        settings: &TrackingSettings,
    ) -> Result<i64> {
        let store = self.store.as_ref().ok_or(Error::StoreUnavailable)?;
        let id = {
            let store = store.lock().await;
            let id = store.insert(fix, source, at)?;
            let evicted = store.enforce_row_cap(settings.max_queued_rows)?;
            if evicted > 0 {
                warn!("Queue over capacity, evicted {} rows", evicted);
            }
            id
        };

        self.last_logged_at = Some(at);
        self.events.send(TrackerEvent::FixLogged {
            id,
            source,
            fix: fix.clone(),
        });
        Ok(id)
    }

    fn set_state(&mut self, state: TrackingState) {
        if self.state == state {
            return;
        }
        info!("Tracking state {} -> {}", self.state, state);
        self.state = state;
        self.events.send(TrackerEvent::StateChanged {
            state,
            mode: self.sampler.mode(),
        });
        self.publish_status();
    }

    fn publish_status(&self) {
        let acquiring = self.state.is_acquiring();
        self.status.send_replace(TrackerStatus {
            state: self.state,
            mode: self.sampler.mode(),
            timeline_logging: self.timeline_logging,
            phase: self.sampler.phase().filter(|_| acquiring),
            posture: self.requested.map(|(_, posture)| posture),
            last_fix: self.last_fix.clone(),
            last_logged_at: self.last_logged_at,
            last_error: self.last_error.clone(),
        });
    }
}

async fn next_position(
    fixes: &mut Option<broadcast::Receiver<PositionEvent>>,
) -> std::result::Result<PositionEvent, RecvError> {
    match fixes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn wake_lead(settings: &TrackingSettings) -> Duration {
    Duration::from_secs_f64(settings.duty_cycle.wake_lead_secs.max(0.0))
}
