//! Runtime-mutable tracking settings.
//!
//! [`TrackingSettings`] carries every tunable the acquisition and delivery
//! loops consult. It is shared through a [`SettingsHandle`] backed by a
//! `watch` channel; both loops read a fresh snapshot at every evaluation
//! cycle, so an update takes effect on the next cycle without a restart.
//!
//! ```
//! use waymark_core::{SettingsHandle, TrackingSettings};
//!
//! let handle = SettingsHandle::new(TrackingSettings::default());
//! handle.update(|s| s.time_threshold_minutes = 10.0)?;
//! assert_eq!(handle.current().time_threshold_minutes, 10.0);
//!
//! // Invalid updates are refused and leave the settings untouched
//! assert!(handle.update(|s| s.accuracy_ceiling_m = -1.0).is_err());
//! assert_eq!(handle.current().accuracy_ceiling_m, 50.0);
//! # Ok::<(), waymark_core::Error>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use crate::threshold::Thresholds;

/// Longest accepted time threshold and sleep lead (one week, in seconds).
pub const MAX_THRESHOLD_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Longest accepted poll or submission interval (one day, in seconds).
pub const MAX_INTERVAL_SECS: f64 = 24.0 * 3600.0;

/// Longest accepted retention horizon (about ten years).
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Constants of the Normal-mode duty cycle and the fixed-cadence modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyCycle {
    /// Countdown above which the radio sleeps (seconds).
    pub deep_sleep_lead_secs: f64,
    /// Countdown at or below which the radio goes to high accuracy (seconds).
    pub wake_lead_secs: f64,
    /// Poll interval during approach and wake phases (seconds).
    pub approach_poll_secs: f64,
    /// Accuracy at or below which a wake-phase fix triggers early shutoff (meters).
    pub excellent_accuracy_m: f64,
    /// Fixed cadence in High mode (seconds).
    pub high_interval_secs: f64,
    /// Fixed cadence in PowerSaver mode (seconds).
    pub power_saver_interval_secs: f64,
}

impl Default for DutyCycle {
    fn default() -> Self {
        Self {
            deep_sleep_lead_secs: 200.0,
            wake_lead_secs: 100.0,
            approach_poll_secs: 1.0,
            excellent_accuracy_m: 20.0,
            high_interval_secs: 1.0,
            power_saver_interval_secs: 300.0,
        }
    }
}

/// Every runtime-mutable tunable of acquisition and delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Minimum time between logged fixes (minutes, strict).
    pub time_threshold_minutes: f64,
    /// Minimum displacement between logged fixes (meters, strict).
    pub distance_threshold_m: f64,
    /// Fixes with a worse accuracy than this are discarded (meters, inclusive).
    pub accuracy_ceiling_m: f64,
    /// Minimum time between two submissions to the remote endpoint (seconds).
    pub min_sync_interval_secs: f64,
    /// Rows older than this are purged whatever their state (days).
    pub retention_days: u32,
    /// Maximum number of rows kept in the queue.
    pub max_queued_rows: u64,
    /// Duty-cycle constants.
    pub duty_cycle: DutyCycle,
    /// Backoff after technical delivery failures.
    pub retry: RetryConfig,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            time_threshold_minutes: 5.0,
            distance_threshold_m: 15.0,
            accuracy_ceiling_m: 50.0,
            min_sync_interval_secs: 12.0,
            retention_days: 30,
            max_queued_rows: 10_000,
            duty_cycle: DutyCycle::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl TrackingSettings {
    /// Time threshold as a duration.
    pub fn time_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.time_threshold_minutes.max(0.0) * 60.0)
    }

    /// Minimum interval between submissions.
    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_sync_interval_secs.max(0.0))
    }

    /// Retention horizon.
    pub fn retention(&self) -> time::Duration {
        time::Duration::days(i64::from(self.retention_days))
    }

    /// Logging thresholds for the evaluator.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.time_threshold(), self.distance_threshold_m)
    }

    /// Field-level problems, as `(field, message)` pairs.
    pub fn problems(&self) -> Vec<(String, String)> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                problems.push((field.to_string(), message.to_string()));
            }
        };

        check(
            positive(self.time_threshold_minutes)
                && self.time_threshold_minutes * 60.0 <= MAX_THRESHOLD_SECS,
            "time_threshold_minutes",
            "must be a positive number of minutes, at most one week",
        );
        check(
            non_negative(self.distance_threshold_m),
            "distance_threshold_m",
            "must be a non-negative number of meters",
        );
        check(
            positive(self.accuracy_ceiling_m),
            "accuracy_ceiling_m",
            "must be a positive number of meters",
        );
        check(
            non_negative(self.min_sync_interval_secs)
                && self.min_sync_interval_secs <= MAX_INTERVAL_SECS,
            "min_sync_interval_secs",
            "must be a non-negative number of seconds, at most one day",
        );
        check(
            self.retention_days > 0 && self.retention_days <= MAX_RETENTION_DAYS,
            "retention_days",
            "must be between one day and 3650 days",
        );
        check(
            self.max_queued_rows > 0,
            "max_queued_rows",
            "must be at least 1",
        );

        let duty = &self.duty_cycle;
        check(
            interval(duty.wake_lead_secs),
            "duty_cycle.wake_lead_secs",
            "must be positive, at most one day",
        );
        check(
            duty.deep_sleep_lead_secs.is_finite()
                && duty.deep_sleep_lead_secs >= duty.wake_lead_secs
                && duty.deep_sleep_lead_secs <= MAX_THRESHOLD_SECS,
            "duty_cycle.deep_sleep_lead_secs",
            "must not be shorter than wake_lead_secs or longer than one week",
        );
        check(
            interval(duty.approach_poll_secs),
            "duty_cycle.approach_poll_secs",
            "must be positive, at most one day",
        );
        check(
            non_negative(duty.excellent_accuracy_m),
            "duty_cycle.excellent_accuracy_m",
            "must be non-negative",
        );
        check(
            interval(duty.high_interval_secs),
            "duty_cycle.high_interval_secs",
            "must be positive, at most one day",
        );
        check(
            interval(duty.power_saver_interval_secs),
            "duty_cycle.power_saver_interval_secs",
            "must be positive, at most one day",
        );

        problems.extend(self.retry.problems());
        problems
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }

        let message = problems
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::InvalidConfig(message))
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn interval(secs: f64) -> bool {
    positive(secs) && secs <= MAX_INTERVAL_SECS
}

/// Shared, observable handle to the current [`TrackingSettings`].
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<TrackingSettings>>,
}

impl SettingsHandle {
    /// Create a handle holding `settings`.
    pub fn new(settings: TrackingSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current settings.
    pub fn current(&self) -> TrackingSettings {
        self.tx.borrow().clone()
    }

    /// Apply `f` to a copy of the settings and publish it if it validates.
    pub fn update<F>(&self, f: F) -> Result<TrackingSettings>
    where
        F: FnOnce(&mut TrackingSettings),
    {
        let mut next = self.current();
        f(&mut next);
        self.replace(next)
    }

    /// Replace the settings wholesale if the new value validates.
    pub fn replace(&self, settings: TrackingSettings) -> Result<TrackingSettings> {
        settings.validate()?;
        self.tx.send_replace(settings.clone());
        Ok(settings)
    }

    /// Receiver notified on every accepted update.
    pub fn subscribe(&self) -> watch::Receiver<TrackingSettings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(TrackingSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TrackingSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.time_threshold(), Duration::from_secs(300));
        assert_eq!(settings.min_sync_interval(), Duration::from_secs(12));
        assert_eq!(settings.retention(), time::Duration::days(30));
        assert_eq!(settings.duty_cycle.deep_sleep_lead_secs, 200.0);
        assert_eq!(settings.duty_cycle.wake_lead_secs, 100.0);
        assert_eq!(settings.duty_cycle.excellent_accuracy_m, 20.0);
    }

    #[test]
    fn test_validation_collects_fields() {
        let settings = TrackingSettings {
            time_threshold_minutes: 0.0,
            accuracy_ceiling_m: f64::NAN,
            retention_days: 0,
            duty_cycle: DutyCycle {
                deep_sleep_lead_secs: 50.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let fields: Vec<_> = settings.problems().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            fields,
            vec![
                "time_threshold_minutes",
                "accuracy_ceiling_m",
                "retention_days",
                "duty_cycle.deep_sleep_lead_secs",
            ]
        );

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("retention_days: must be between one day"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: TrackingSettings = serde_json::from_str(
            r#"{"time_threshold_minutes": 2, "duty_cycle": {"wake_lead_secs": 60}}"#,
        )
        .unwrap();
        assert_eq!(settings.time_threshold_minutes, 2.0);
        assert_eq!(settings.distance_threshold_m, 15.0);
        assert_eq!(settings.duty_cycle.wake_lead_secs, 60.0);
        assert_eq!(settings.duty_cycle.deep_sleep_lead_secs, 200.0);
    }

    #[tokio::test]
    async fn test_handle_notifies_subscribers() {
        let handle = SettingsHandle::default();
        let mut rx = handle.subscribe();

        handle.update(|s| s.distance_threshold_m = 30.0).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().distance_threshold_m, 30.0);

        // Clones share state
        let other = handle.clone();
        assert_eq!(other.current().distance_threshold_m, 30.0);
    }

    #[test]
    fn test_extreme_values_are_refused() {
        let handle = SettingsHandle::default();
        assert!(handle.update(|s| s.time_threshold_minutes = 1e300).is_err());
        assert!(handle.update(|s| s.retention_days = u32::MAX).is_err());
        assert!(handle.update(|s| s.min_sync_interval_secs = 1e20).is_err());
        assert!(
            handle
                .update(|s| s.duty_cycle.power_saver_interval_secs = f64::MAX)
                .is_err()
        );
        assert!(handle.update(|s| s.retry.max_delay_secs = 1e300).is_err());
        assert_eq!(handle.current(), TrackingSettings::default());

        // The bounds themselves are accepted and usable
        let settings = handle
            .update(|s| {
                s.time_threshold_minutes = 7.0 * 24.0 * 60.0;
                s.retention_days = MAX_RETENTION_DAYS;
                s.min_sync_interval_secs = MAX_INTERVAL_SECS;
            })
            .unwrap();
        assert_eq!(settings.time_threshold(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(settings.retention(), time::Duration::days(3650));
    }

    #[test]
    fn test_handle_rejects_invalid_update() {
        let handle = SettingsHandle::default();
        let result = handle.update(|s| s.max_queued_rows = 0);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(handle.current().max_queued_rows, 10_000);
    }
}
