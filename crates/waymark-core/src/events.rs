//! Tracker event stream.
//!
//! The tracker owns a broadcast channel; any number of observers (UI, web
//! socket clients, the sync trigger) subscribe to it. Lagging observers
//! miss events but never slow the tracker down.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

use waymark_types::{EntrySource, LocationFix, PerformanceMode, TrackingState};

/// Why a deadline passed without a row being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// No usable fix arrived during the wake window.
    NoFix,
    /// A fix arrived but had not moved past the distance threshold.
    Stationary,
}

/// Events emitted by the tracker.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TrackerEvent {
    /// Lifecycle state or performance mode changed.
    StateChanged {
        state: TrackingState,
        mode: PerformanceMode,
    },
    /// Current position (every fix that passes the quality gate while active).
    Fix { fix: LocationFix },
    /// A fix was written to the queue.
    FixLogged {
        id: i64,
        source: EntrySource,
        fix: LocationFix,
    },
    /// A deadline passed without a row.
    Gap {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        reason: GapReason,
    },
    /// A fatal fault moved the tracker to `error`.
    Fault { message: String },
}

/// Receiver for tracker events.
pub type EventReceiver = broadcast::Receiver<TrackerEvent>;

/// Fan-out of tracker events.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<TrackerEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: TrackerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
