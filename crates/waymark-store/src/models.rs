//! Data models for queued rows.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use waymark_types::{DeliveryState, EntrySource, LocationFix};

/// An accepted fix held in the durable queue, with its delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedLocation {
    /// Database row ID.
    pub id: i64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Speed in meters per second.
    pub speed: Option<f64>,
    /// Bearing in degrees.
    pub bearing: Option<f64>,
    /// Provider tag.
    pub provider: String,
    /// When the fix was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Whether the row was logged automatically or on user request.
    pub source: EntrySource,
    /// Delivery lifecycle state.
    pub delivery_state: DeliveryState,
    /// Number of delivery attempts so far.
    pub attempt_count: u32,
    /// When the last delivery attempt started.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
    /// Earliest time the row may be claimed again after a technical failure.
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    /// Diagnostic from the last failed attempt.
    pub last_error: Option<String>,
    /// Why the row was rejected (set only in `Rejected`).
    pub rejection_reason: Option<String>,
    /// When the row was inserted (the logging decision time).
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl QueuedLocation {
    /// Rebuild the fix this row was captured from.
    pub fn to_fix(&self) -> LocationFix {
        LocationFix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            altitude: self.altitude,
            speed: self.speed,
            bearing: self.bearing,
            provider: self.provider.clone(),
            timestamp: self.captured_at,
        }
    }
}

/// Aggregate queue counts for status displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Rows waiting for delivery.
    pub pending: u64,
    /// Rows claimed by an in-flight attempt.
    pub syncing: u64,
    /// Rows delivered.
    pub synced: u64,
    /// Rows permanently refused.
    pub rejected: u64,
    /// Capture time of the oldest pending row.
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_pending_at: Option<OffsetDateTime>,
    /// Most recent delivery error recorded on any row.
    pub last_error: Option<String>,
}

impl QueueStats {
    /// Total rows in the queue.
    pub fn total(&self) -> u64 {
        self.pending + self.syncing + self.synced + self.rejected
    }

    /// Rows still awaiting a final outcome.
    pub fn undelivered(&self) -> u64 {
        self.pending + self.syncing
    }
}
