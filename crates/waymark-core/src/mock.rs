//! In-process collaborators for tests and headless runs.
//!
//! - [`MockPositioning`]: emits scripted fixes, records every update request
//! - [`RecordingIndicator`]: records indicator calls
//! - [`MockTransport`]: scripted delivery outcomes, records submission times
//!
//! A shared [`Journal`] lets a test check the relative order of calls made
//! to different collaborators (indicator before radio, for instance).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use waymark_types::LocationFix;

use crate::error::{Error, Result};
use crate::indicator::{IndicatorStatus, LivenessIndicator};
use crate::positioning::{PositionEvent, PositioningSource, UpdateRequest};
use crate::transport::{DeliveryTransport, LocationPayload, SubmitOutcome, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered log of collaborator calls, shared between mocks.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    /// All entries so far, oldest first.
    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.entries)
            .iter()
            .position(|entry| entry.starts_with(prefix))
    }
}

/// Scriptable positioning subsystem.
#[derive(Debug)]
pub struct MockPositioning {
    sender: broadcast::Sender<PositionEvent>,
    requests: Mutex<Vec<UpdateRequest>>,
    active: AtomicBool,
    stop_count: AtomicU32,
    fail_requests: AtomicBool,
    journal: Journal,
}

impl MockPositioning {
    /// Create a mock with its own journal.
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Create a mock that records into `journal`.
    pub fn with_journal(journal: Journal) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            sender,
            requests: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
            stop_count: AtomicU32::new(0),
            fail_requests: AtomicBool::new(false),
            journal,
        }
    }

    /// Deliver an event to subscribers. Returns the number of receivers.
    pub fn emit(&self, event: PositionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Deliver a fix to subscribers.
    pub fn emit_fix(&self, fix: LocationFix) -> usize {
        self.emit(PositionEvent::Fix(fix))
    }

    /// Make subsequent `request_updates` calls fail.
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::Relaxed);
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<UpdateRequest> {
        lock(&self.requests).clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<UpdateRequest> {
        lock(&self.requests).last().copied()
    }

    /// Whether updates are currently requested.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Number of `stop_updates` calls.
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::Relaxed)
    }
}

impl Default for MockPositioning {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositioningSource for MockPositioning {
    async fn request_updates(&self, request: UpdateRequest) -> Result<()> {
        if self.fail_requests.load(Ordering::Relaxed) {
            return Err(Error::PositioningUnavailable("mock radio failure".into()));
        }
        self.journal.record(format!("radio:request:{}", request.posture));
        lock(&self.requests).push(request);
        self.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_updates(&self) -> Result<()> {
        self.journal.record("radio:stop");
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.sender.subscribe()
    }
}

/// A recorded indicator call.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorCall {
    /// `show(status)`.
    Show(IndicatorStatus),
    /// `retract()`.
    Retract,
}

/// Indicator that records calls.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    calls: Mutex<Vec<IndicatorCall>>,
    fail_show: AtomicBool,
    journal: Journal,
}

impl RecordingIndicator {
    /// Create an indicator with its own journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an indicator that records into `journal`.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Make subsequent `show` calls fail.
    pub fn set_fail_show(&self, fail: bool) {
        self.fail_show.store(fail, Ordering::Relaxed);
    }

    /// Every call received, oldest first.
    pub fn calls(&self) -> Vec<IndicatorCall> {
        lock(&self.calls).clone()
    }

    /// What the indicator currently shows, if visible.
    pub fn current(&self) -> Option<IndicatorStatus> {
        match lock(&self.calls).last() {
            Some(IndicatorCall::Show(status)) => Some(status.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl LivenessIndicator for RecordingIndicator {
    async fn show(&self, status: IndicatorStatus) -> Result<()> {
        if self.fail_show.load(Ordering::Relaxed) {
            return Err(Error::Indicator("mock indicator failure".into()));
        }
        self.journal.record(format!("indicator:show:{:?}", status));
        lock(&self.calls).push(IndicatorCall::Show(status));
        Ok(())
    }

    async fn retract(&self) -> Result<()> {
        self.journal.record("indicator:retract");
        lock(&self.calls).push(IndicatorCall::Retract);
        Ok(())
    }
}

/// Transport with scripted outcomes.
///
/// Outcomes are consumed in order; once the script is exhausted every
/// submission is accepted.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<std::result::Result<SubmitOutcome, TransportError>>>,
    submissions: Mutex<Vec<(Instant, LocationPayload)>>,
    latency: Mutex<Duration>,
}

impl MockTransport {
    /// Transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future submission.
    pub fn push_outcome(&self, outcome: std::result::Result<SubmitOutcome, TransportError>) {
        lock(&self.script).push_back(outcome);
    }

    /// Simulate network latency per submission.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Payloads submitted so far.
    pub fn submissions(&self) -> Vec<LocationPayload> {
        lock(&self.submissions)
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Timer instants at which submissions started.
    pub fn submission_times(&self) -> Vec<Instant> {
        lock(&self.submissions).iter().map(|(at, _)| *at).collect()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn submit(
        &self,
        payload: &LocationPayload,
    ) -> std::result::Result<SubmitOutcome, TransportError> {
        lock(&self.submissions).push((Instant::now(), payload.clone()));

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        lock(&self.script)
            .pop_front()
            .unwrap_or(Ok(SubmitOutcome::Accepted))
    }
}
