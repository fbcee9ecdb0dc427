//! Capability interface to the platform positioning subsystem.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use waymark_types::{LocationFix, RadioPosture};

use crate::error::Result;

/// Posture and cadence asked of the positioning subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Radio posture.
    pub posture: RadioPosture,
    /// Desired interval between fixes.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl UpdateRequest {
    /// Create a request.
    pub fn new(posture: RadioPosture, interval: Duration) -> Self {
        Self { posture, interval }
    }
}

/// Something the positioning subsystem reports.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    /// A new fix.
    Fix(LocationFix),
    /// The subsystem can no longer deliver fixes.
    Unavailable(String),
    /// Location permission was withdrawn.
    PermissionRevoked,
}

/// Platform positioning, as seen by the tracker.
///
/// Only the tracker engages the radio; other components observe fixes
/// through the tracker's event stream.
#[async_trait]
pub trait PositioningSource: Send + Sync {
    /// Start or re-configure updates.
    async fn request_updates(&self, request: UpdateRequest) -> Result<()>;

    /// Release the radio.
    async fn stop_updates(&self) -> Result<()>;

    /// Subscribe to fixes and faults.
    fn subscribe(&self) -> broadcast::Receiver<PositionEvent>;
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_json() {
        let request = UpdateRequest::new(RadioPosture::HighAccuracy, Duration::from_millis(1500));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"posture":"high_accuracy","interval":1.5}"#);

        let back: UpdateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
