//! Delivery of queued locations.
//!
//! The [`SyncEngine`] drains the store one row at a time:
//!
//! 1. Claim the oldest eligible `pending` row (it becomes `syncing`)
//! 2. Re-check automatic rows against the last delivered one
//! 3. Submit through the [`DeliveryTransport`]
//! 4. Mark the row `synced`, `rejected`, or back to `pending` with a
//!    backoff deadline
//!
//! Consecutive submissions are always at least the configured minimum
//! interval apart, whatever their outcome. A drain ends when nothing is
//! claimable, when the device goes offline, or on cancellation. It never ends
//! because a single row failed.
//!
//! The engine shares nothing with the tracker except the store, and has its
//! own cancellation scope: stopping acquisition never interrupts delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use waymark_store::QueuedLocation;
use waymark_types::EntrySource;

use crate::SharedStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::settings::{SettingsHandle, TrackingSettings};
use crate::transport::{DeliveryTransport, LocationPayload, SubmitOutcome, TransportError};

/// Outcome counts of one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Rows handed to the transport.
    pub submitted: usize,
    pub synced: usize,
    /// Rows returned to `pending` after a technical failure.
    pub retried: usize,
    /// Rows rejected by the server or by the local re-check.
    pub rejected: usize,
}

impl DrainReport {
    /// Whether the drain touched any row.
    pub fn is_empty(&self) -> bool {
        self.submitted == 0 && self.rejected == 0
    }
}

/// Cloneable control handle for a running [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    trigger: Arc<Notify>,
    online: Arc<watch::Sender<bool>>,
}

impl SyncHandle {
    /// Ask the engine to drain now (e.g. after a row was queued).
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Report connectivity. Going online starts a drain.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            info!("Connectivity: {}", if online { "online" } else { "offline" });
            *current = online;
            true
        });
    }

    /// Last reported connectivity.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }
}

/// The drain loop.
pub struct SyncEngine {
    store: SharedStore,
    transport: Arc<dyn DeliveryTransport>,
    settings: SettingsHandle,
    clock: Clock,
    trigger: Arc<Notify>,
    online: Arc<watch::Sender<bool>>,
    last_submission: Option<Instant>,
    consecutive_failures: u32,
}

impl SyncEngine {
    /// Create an engine. It starts out online.
    pub fn new(
        store: SharedStore,
        transport: Arc<dyn DeliveryTransport>,
        settings: SettingsHandle,
    ) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            store,
            transport,
            settings,
            clock: Clock::system(),
            trigger: Arc::new(Notify::new()),
            online: Arc::new(online),
            last_submission: None,
            consecutive_failures: 0,
        }
    }

    /// Use `clock` for wall-clock time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// A control handle.
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            trigger: Arc::clone(&self.trigger),
            online: Arc::clone(&self.online),
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Drain whenever triggered, when connectivity returns, when a retry
    /// comes due, and otherwise every minimum sync interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Sync engine started");
        let mut online = self.online.subscribe();

        loop {
            match self.drain(&cancel).await {
                Ok(report) if !report.is_empty() => info!(
                    "Drain finished: {} submitted, {} synced, {} retried, {} rejected",
                    report.submitted, report.synced, report.retried, report.rejected
                ),
                Ok(_) => {}
                Err(e) => error!("Drain aborted by storage failure: {}", e),
            }

            let wake = self.next_wake().await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync engine cancelled, shutting down");
                    break;
                }
                _ = self.trigger.notified() => {
                    debug!("Drain triggered");
                }
                _ = online.changed() => {
                    debug!("Connectivity changed");
                }
                _ = sleep_until(wake) => {}
            }
        }

        info!("Sync engine stopped");
    }

    /// Deliver claimable rows until the queue is exhausted, the device is
    /// offline, or `cancel` fires.
    ///
    /// Cancellation is honored between rows only; a submission in flight
    /// always completes and its row is settled.
    pub async fn drain(&mut self, cancel: &CancellationToken) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !*self.online.borrow() {
                debug!("Offline, delivery paused");
                break;
            }

            let settings = self.settings.current();
            if self.store.lock().await.pending_due(self.clock.now())? == 0 {
                break;
            }

            if !self.wait_for_slot(&settings, cancel).await {
                break;
            }

            let claimed = self.store.lock().await.claim_next(self.clock.now())?;
            let Some(row) = claimed else {
                break;
            };

            self.deliver(row, &settings, &mut report).await?;
        }

        Ok(report)
    }

    /// Sleep until the minimum interval since the last submission has passed.
    ///
    /// Returns false if cancelled while waiting.
    async fn wait_for_slot(&self, settings: &TrackingSettings, cancel: &CancellationToken) -> bool {
        let Some(last) = self.last_submission else {
            return true;
        };
        let ready = last + settings.min_sync_interval();
        if ready <= Instant::now() {
            return true;
        }

        debug!(
            "Rate limit: next submission in {:.1}s",
            (ready - Instant::now()).as_secs_f64()
        );
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep_until(ready) => true,
        }
    }

    async fn deliver(
        &mut self,
        row: QueuedLocation,
        settings: &TrackingSettings,
        report: &mut DrainReport,
    ) -> Result<()> {
        if let Some(reason) = self.local_rejection(&row, settings).await? {
            info!("Queued location {} rejected locally: {}", row.id, reason);
            self.store
                .lock()
                .await
                .mark_rejected(row.id, &format!("local: {reason}"))?;
            report.rejected += 1;
            return Ok(());
        }

        let payload = LocationPayload::from(&row);
        self.last_submission = Some(Instant::now());
        report.submitted += 1;
        let outcome = self.transport.submit(&payload).await;

        let store = Arc::clone(&self.store);
        let store = store.lock().await;
        match outcome {
            Ok(SubmitOutcome::Accepted) => {
                self.record_success();
                store.mark_synced(row.id)?;
                report.synced += 1;
                debug!("Queued location {} delivered", row.id);
            }
            Ok(SubmitOutcome::SoftRejected { reason }) => {
                self.record_success();
                info!("Queued location {} rejected by server: {}", row.id, reason);
                store.mark_rejected(row.id, &format!("server: {reason}"))?;
                report.rejected += 1;
            }
            Err(e) if e.is_technical() => {
                let delay = settings.retry.delay_for_failure(row.attempt_count);
                self.record_failure(row.id, &e, delay);
                store.mark_retry(row.id, &e.to_string(), self.clock.now() + delay)?;
                report.retried += 1;
            }
            Err(e) => {
                self.record_success();
                let message = match &e {
                    TransportError::Rejected { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                info!("Queued location {} rejected by server: {}", row.id, e);
                store.mark_rejected(row.id, &format!("server: {message}"))?;
                report.rejected += 1;
            }
        }

        Ok(())
    }

    /// Repeat the logging decision against the last delivered automatic row.
    ///
    /// Manual rows, rows with no delivered predecessor, and retried rows
    /// older than that predecessor are not re-checked.
    async fn local_rejection(
        &self,
        row: &QueuedLocation,
        settings: &TrackingSettings,
    ) -> Result<Option<String>> {
        if row.source != EntrySource::Automatic {
            return Ok(None);
        }

        let previous = self.store.lock().await.last_synced(EntrySource::Automatic)?;
        let Some(previous) = previous else {
            return Ok(None);
        };
        if previous.created_at > row.created_at {
            return Ok(None);
        }

        let elapsed = row.created_at - previous.created_at;
        let distance = previous.to_fix().distance_to(&row.to_fix());
        let evaluation = settings.thresholds().evaluate(elapsed, distance);

        Ok(evaluation.reason())
    }

    fn record_success(&mut self) {
        if self.consecutive_failures > 3 {
            info!(
                "Delivery recovered after {} failed attempts",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, id: i64, err: &TransportError, delay: Duration) {
        self.consecutive_failures += 1;
        if self.consecutive_failures <= 3 {
            warn!(
                "Failed to deliver queued location {}: {} (retry in {:.1}s)",
                id,
                err,
                delay.as_secs_f64()
            );
        } else if self.consecutive_failures == 4 {
            error!(
                "Delivery failing after {} attempts, will continue retrying silently",
                self.consecutive_failures
            );
        }
    }

    /// When to look at the queue again if nothing else happens.
    async fn next_wake(&self) -> Instant {
        let fallback = Instant::now() + self.settings.current().min_sync_interval();
        let due = self
            .store
            .lock()
            .await
            .next_retry_due(self.clock.now())
            .unwrap_or_else(|e| {
                warn!("Failed to read retry schedule: {}", e);
                None
            });

        match due {
            Some(due) => self.clock.instant_for(due).min(fallback),
            None => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use time::OffsetDateTime;
    use time::macros::datetime;
    use tokio::sync::Mutex;
    use waymark_store::Store;
    use waymark_types::{DeliveryState, LocationFix};

    const T0: OffsetDateTime = datetime!(2024-05-01 08:00 UTC);

    struct Fixture {
        engine: SyncEngine,
        transport: Arc<MockTransport>,
        store: SharedStore,
        settings: SettingsHandle,
        clock: Clock,
    }

    fn fixture() -> Fixture {
        let store: SharedStore = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let transport = Arc::new(MockTransport::new());
        let clock = Clock::starting_at(T0);
        let settings = SettingsHandle::default();
        let engine =
            SyncEngine::new(store.clone(), transport.clone(), settings.clone()).with_clock(clock);
        Fixture {
            engine,
            transport,
            store,
            settings,
            clock,
        }
    }

    /// Queue a fix `minutes` after T0, `north_m` north of the origin.
    async fn queue(store: &SharedStore, minutes: i64, north_m: f64, source: EntrySource) -> i64 {
        let (lat, lon) = waymark_types::offset_meters(52.52, 13.405, north_m, 0.0);
        let at = T0 + time::Duration::minutes(minutes);
        let fix = LocationFix::builder(lat, lon)
            .accuracy(10.0)
            .timestamp(at)
            .build();
        store.lock().await.insert(&fix, source, at).unwrap()
    }

    async fn state_of(store: &SharedStore, id: i64) -> DeliveryState {
        store.lock().await.get(id).unwrap().unwrap().delivery_state
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_delivers_in_capture_order() {
        let mut f = fixture();
        let first = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        let second = queue(&f.store, 6, 40.0, EntrySource::Automatic).await;

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.synced, 2);

        assert_eq!(state_of(&f.store, first).await, DeliveryState::Synced);
        assert_eq!(state_of(&f.store, second).await, DeliveryState::Synced);

        let payloads = f.transport.submissions();
        assert!(payloads[0].timestamp < payloads[1].timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_respect_min_interval() {
        let mut f = fixture();
        for i in 0..4 {
            queue(&f.store, i * 6, i as f64 * 40.0, EntrySource::Automatic).await;
        }

        f.engine.drain(&CancellationToken::new()).await.unwrap();

        let times = f.transport.submission_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(12));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_technical_failure_retries_with_backoff() {
        let mut f = fixture();
        let id = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        f.transport
            .push_outcome(Err(TransportError::Timeout(Duration::from_secs(10))));

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.retried, 1);

        let row = f.store.lock().await.get(id).unwrap().unwrap();
        assert_eq!(row.delivery_state, DeliveryState::Pending);
        assert_eq!(row.attempt_count, 1);
        assert!(row.last_error.unwrap().contains("timed out"));
        let next = row.next_attempt_at.unwrap();
        assert!(next > f.clock.now());
        assert!(next <= f.clock.now() + Duration::from_secs(2));

        // Due again once the backoff has passed
        tokio::time::advance(Duration::from_secs(15)).await;
        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.synced, 1);
        let row = f.store.lock().await.get(id).unwrap().unwrap();
        assert_eq!(row.delivery_state, DeliveryState::Synced);
        assert_eq!(row.attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_row_does_not_block_others() {
        let mut f = fixture();
        f.settings
            .update(|s| s.retry = crate::retry::RetryConfig::constant(Duration::from_secs(60)))
            .unwrap();
        let failing = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        let other = queue(&f.store, 6, 40.0, EntrySource::Manual).await;
        f.transport.push_outcome(Err(TransportError::Server {
            status: 503,
            message: "maintenance".into(),
        }));

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(state_of(&f.store, failing).await, DeliveryState::Pending);
        assert_eq!(state_of(&f.store, other).await, DeliveryState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_rejections_are_terminal() {
        let mut f = fixture();
        let soft = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        let hard = queue(&f.store, 6, 40.0, EntrySource::Manual).await;
        f.transport.push_outcome(Ok(SubmitOutcome::SoftRejected {
            reason: "time 2.3 min < 5 min threshold".into(),
        }));
        f.transport.push_outcome(Err(TransportError::Rejected {
            status: 422,
            message: "invalid coordinates".into(),
        }));

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.rejected, 2);

        let store = f.store.lock().await;
        let soft = store.get(soft).unwrap().unwrap();
        assert_eq!(soft.delivery_state, DeliveryState::Rejected);
        assert_eq!(
            soft.rejection_reason.as_deref(),
            Some("server: time 2.3 min < 5 min threshold")
        );
        let hard = store.get(hard).unwrap().unwrap();
        assert_eq!(
            hard.rejection_reason.as_deref(),
            Some("server: invalid coordinates")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_success_body_is_not_resent() {
        let mut f = fixture();
        let id = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        f.transport
            .push_outcome(crate::transport::SubmitResponse::classify("OK"));

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(state_of(&f.store, id).await, DeliveryState::Synced);

        tokio::time::advance(Duration::from_secs(120)).await;
        f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.transport.submission_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_row_is_retried() {
        let mut f = fixture();
        let id = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        f.transport
            .push_outcome(Err(TransportError::from_status(429, "slow down")));

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(state_of(&f.store, id).await, DeliveryState::Pending);

        tokio::time::advance(Duration::from_secs(15)).await;
        f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(state_of(&f.store, id).await, DeliveryState::Synced);
        assert_eq!(f.transport.submission_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_recheck_rejects_without_submitting() {
        let mut f = fixture();
        queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        // Only two minutes and five meters after the first row
        let close = queue(&f.store, 2, 5.0, EntrySource::Automatic).await;
        let manual = queue(&f.store, 3, 5.0, EntrySource::Manual).await;

        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(f.transport.submission_count(), 2);

        let row = f.store.lock().await.get(close).unwrap().unwrap();
        assert_eq!(row.delivery_state, DeliveryState::Rejected);
        let reason = row.rejection_reason.unwrap();
        assert!(reason.starts_with("local: time 2.0 min < 5 min threshold"), "{reason}");
        assert_eq!(state_of(&f.store, manual).await, DeliveryState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_stops_drain() {
        let mut f = fixture();
        let id = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        let handle = f.engine.handle();

        handle.set_online(false);
        assert!(!handle.is_online());
        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(state_of(&f.store, id).await, DeliveryState::Pending);

        handle.set_online(true);
        let report = f.engine.drain(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.synced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_rows_leaves_rest_pending() {
        let mut f = fixture();
        queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        let second = queue(&f.store, 6, 40.0, EntrySource::Automatic).await;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel();
            })
        };

        let report = f.engine.drain(&cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(state_of(&f.store, second).await, DeliveryState::Pending);
        assert_eq!(f.store.lock().await.count(Some(DeliveryState::Syncing)).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_on_trigger() {
        let f = fixture();
        let handle = f.engine.handle();
        let cancel = CancellationToken::new();
        let task = f.engine.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let id = queue(&f.store, 0, 0.0, EntrySource::Automatic).await;
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(state_of(&f.store, id).await, DeliveryState::Synced);

        cancel.cancel();
        task.await.unwrap();
    }
}
