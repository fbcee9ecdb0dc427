//! Time-and-distance logging thresholds.
//!
//! A candidate is logged only when **both** the elapsed time and the
//! great-circle displacement since the last accepted fix strictly exceed
//! their thresholds.
//!
//! ```
//! use std::time::Duration;
//! use waymark_core::threshold::should_log;
//! use waymark_types::{LocationFix, offset_meters};
//! use time::macros::datetime;
//!
//! let t0 = datetime!(2026-03-01 09:00 UTC);
//! let a = LocationFix::builder(52.52, 13.405).timestamp(t0).build();
//! let (lat, lon) = offset_meters(52.52, 13.405, 50.0, 0.0);
//!
//! let soon = LocationFix::builder(lat, lon).timestamp(t0 + time::Duration::minutes(4)).build();
//! let later = LocationFix::builder(lat, lon).timestamp(t0 + time::Duration::minutes(6)).build();
//!
//! let five_minutes = Duration::from_secs(300);
//! assert!(!should_log(&a, &soon, five_minutes, 15.0));
//! assert!(should_log(&a, &later, five_minutes, 15.0));
//! ```

use std::time::Duration;

use time::OffsetDateTime;

use waymark_types::LocationFix;

/// A time threshold and a distance threshold, both strict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum elapsed time.
    pub time: Duration,
    /// Minimum displacement in meters.
    pub distance_m: f64,
}

impl Thresholds {
    /// Create thresholds.
    pub fn new(time: Duration, distance_m: f64) -> Self {
        Self { time, distance_m }
    }

    /// Evaluate an elapsed time and a displacement against these thresholds.
    pub fn evaluate(&self, elapsed: time::Duration, distance_m: f64) -> Evaluation {
        Evaluation {
            elapsed,
            distance_m,
            thresholds: *self,
        }
    }
}

/// Outcome of comparing one candidate against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Elapsed time since the reference point.
    pub elapsed: time::Duration,
    /// Displacement from the reference point in meters.
    pub distance_m: f64,
    /// Thresholds evaluated against.
    pub thresholds: Thresholds,
}

impl Evaluation {
    /// Whether enough time has passed.
    pub fn time_met(&self) -> bool {
        self.elapsed.whole_milliseconds() > self.thresholds.time.as_millis() as i128
    }

    /// Whether the candidate moved far enough.
    pub fn distance_met(&self) -> bool {
        self.distance_m > self.thresholds.distance_m
    }

    /// Both conditions hold.
    pub fn passes(&self) -> bool {
        self.time_met() && self.distance_met()
    }

    /// Human-readable explanation of a failed evaluation.
    ///
    /// e.g. `time 2.3 min < 5 min threshold`.
    pub fn reason(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.time_met() {
            parts.push(format!(
                "time {:.1} min < {} min threshold",
                self.elapsed.as_seconds_f64() / 60.0,
                trim_number(self.thresholds.time.as_secs_f64() / 60.0)
            ));
        }
        if !self.distance_met() {
            parts.push(format!(
                "distance {:.1} m < {} m threshold",
                self.distance_m,
                trim_number(self.thresholds.distance_m)
            ));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

fn trim_number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{:.1}", v)
    }
}

/// Whether `candidate` should be logged after `last`, by capture timestamps.
pub fn should_log(
    last: &LocationFix,
    candidate: &LocationFix,
    time_threshold: Duration,
    distance_threshold_m: f64,
) -> bool {
    Thresholds::new(time_threshold, distance_threshold_m)
        .evaluate(candidate.timestamp - last.timestamp, last.distance_to(candidate))
        .passes()
}

/// Stateful evaluator: the single source of truth for when the next log is due.
///
/// Elapsed time is measured from an *anchor*: the decision time of the last
/// log, or of the last deadline that produced no row. Displacement is always
/// measured from the last accepted fix. With no baseline at all, any
/// candidate is accepted.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    last_accepted: Option<LocationFix>,
    anchor: Option<OffsetDateTime>,
}

impl ThresholdEvaluator {
    /// Evaluator with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last accepted fix, if any.
    pub fn last_accepted(&self) -> Option<&LocationFix> {
        self.last_accepted.as_ref()
    }

    /// The time elapsed time is measured from, if any.
    pub fn anchor(&self) -> Option<OffsetDateTime> {
        self.anchor
    }

    /// Evaluate `candidate` as if decided at `at`.
    ///
    /// Returns `None` when there is no baseline (always loggable).
    pub fn evaluate_at(
        &self,
        candidate: &LocationFix,
        at: OffsetDateTime,
        thresholds: &Thresholds,
    ) -> Option<Evaluation> {
        let last = self.last_accepted.as_ref()?;
        let anchor = self.anchor.unwrap_or(last.timestamp);
        Some(thresholds.evaluate(at - anchor, last.distance_to(candidate)))
    }

    /// Whether `candidate`, decided at `at`, should be logged.
    pub fn should_log_at(
        &self,
        candidate: &LocationFix,
        at: OffsetDateTime,
        thresholds: &Thresholds,
    ) -> bool {
        self.evaluate_at(candidate, at, thresholds)
            .is_none_or(|evaluation| evaluation.passes())
    }

    /// Seconds until the time threshold is reached, never negative.
    ///
    /// Zero when no anchor exists yet.
    pub fn seconds_until_next_log(&self, now: OffsetDateTime, thresholds: &Thresholds) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let elapsed = (now - anchor).as_seconds_f64();
                (thresholds.time.as_secs_f64() - elapsed).max(0.0)
            }
            None => 0.0,
        }
    }

    /// Whether the time threshold has been strictly exceeded at `now`.
    pub fn is_due(&self, now: OffsetDateTime, thresholds: &Thresholds) -> bool {
        match self.anchor {
            Some(anchor) => {
                (now - anchor).whole_milliseconds() > thresholds.time.as_millis() as i128
            }
            None => true,
        }
    }

    /// Record `fix` as logged at `at`.
    pub fn accept(&mut self, fix: LocationFix, at: OffsetDateTime) {
        self.last_accepted = Some(fix);
        self.anchor = Some(at);
    }

    /// Restart the countdown at `at` without changing the baseline.
    pub fn defer(&mut self, at: OffsetDateTime) {
        self.anchor = Some(at);
    }

    /// Place the anchor so that exactly `lead` remains at `now`.
    ///
    /// Used to open the first acquisition window when no countdown exists.
    pub fn open_window(&mut self, now: OffsetDateTime, lead: Duration, thresholds: &Thresholds) {
        let offset = thresholds.time.as_secs_f64() - lead.as_secs_f64();
        self.anchor = Some(now - time::Duration::seconds_f64(offset));
    }

    /// Replace the baseline fix, keeping the countdown.
    pub fn rebase(&mut self, fix: Option<LocationFix>) {
        self.last_accepted = fix;
    }

    /// Forget the baseline and the countdown.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.anchor = None;
    }
}
