//! Adaptive sampling controller.
//!
//! Chooses the radio posture and poll cadence from the performance mode and
//! the evaluator's countdown. In [`PerformanceMode::Normal`] the countdown
//! drives a three-phase duty cycle:
//!
//! | Phase | Countdown | Posture | Poll |
//! |-------|-----------|---------|------|
//! | Deep sleep | > 200 s | low power | until 200 s remain |
//! | Approach | 100–200 s | low power | 1 s |
//! | Wake | ≤ 100 s | high accuracy until locked | 1 s |
//!
//! During Wake the best fix is held for the deadline. The first fix at or
//! under the excellent accuracy locks the sample and drops the radio back to
//! low power; nothing received afterwards replaces it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use waymark_types::{LocationFix, PerformanceMode, RadioPosture};

use crate::settings::DutyCycle;

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyPhase {
    /// Fixed cadence (High or PowerSaver mode).
    Fixed,
    /// Far from the deadline; radio mostly idle.
    DeepSleep,
    /// Closing in on the deadline; tracking the countdown closely.
    Approach,
    /// Collecting a sample for the deadline.
    Wake,
}

/// What the radio should do until the next poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePlan {
    /// Current phase.
    pub phase: DutyPhase,
    /// Posture to request.
    pub posture: RadioPosture,
    /// Time until the controller wants to be consulted again.
    pub poll: Duration,
}

/// What happened to a fix offered during Wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The fix is excellent and now locked; the radio can drop to low power.
    Locked,
    /// The fix is the best seen so far and is held.
    Held,
    /// The fix was not better than the held one, or a sample is locked.
    Ignored,
    /// Not in Wake; the fix is not a deadline candidate.
    OutOfWindow,
}

/// Pure duty-cycle state: mode, phase and the held deadline sample.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveSampler {
    mode: PerformanceMode,
    phase: Option<DutyPhase>,
    held: Option<LocationFix>,
    locked: bool,
}

impl AdaptiveSampler {
    /// Sampler in the given mode.
    pub fn new(mode: PerformanceMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Current performance mode.
    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// Switch mode. Any held sample is kept only when staying in Normal.
    pub fn set_mode(&mut self, mode: PerformanceMode) {
        if mode != self.mode {
            debug!("Performance mode {} -> {}", self.mode, mode);
            self.mode = mode;
            self.phase = None;
            if mode != PerformanceMode::Normal {
                self.clear_sample();
            }
        }
    }

    /// Phase chosen by the last [`plan`](Self::plan), if any.
    pub fn phase(&self) -> Option<DutyPhase> {
        self.phase
    }

    /// The sample currently held for the deadline.
    pub fn held(&self) -> Option<&LocationFix> {
        self.held.as_ref()
    }

    /// Whether an excellent sample has been locked in this window.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Plan the next poll given `remaining_secs` until the next log is due.
    pub fn plan(&mut self, remaining_secs: f64, duty: &DutyCycle) -> SamplePlan {
        let plan = match self.mode {
            PerformanceMode::High => SamplePlan {
                phase: DutyPhase::Fixed,
                posture: RadioPosture::HighAccuracy,
                poll: secs(duty.high_interval_secs),
            },
            PerformanceMode::PowerSaver => SamplePlan {
                phase: DutyPhase::Fixed,
                posture: RadioPosture::LowPower,
                poll: secs(duty.power_saver_interval_secs),
            },
            PerformanceMode::Normal => self.plan_duty_cycle(remaining_secs, duty),
        };

        if self.phase != Some(plan.phase) {
            debug!(
                "Duty phase {:?} -> {:?} ({:.0}s remaining, {})",
                self.phase, plan.phase, remaining_secs, plan.posture
            );
            if plan.phase == DutyPhase::Wake {
                self.clear_sample();
            }
            self.phase = Some(plan.phase);
        }

        plan
    }

    fn plan_duty_cycle(&self, remaining_secs: f64, duty: &DutyCycle) -> SamplePlan {
        if remaining_secs > duty.deep_sleep_lead_secs {
            SamplePlan {
                phase: DutyPhase::DeepSleep,
                posture: RadioPosture::LowPower,
                poll: secs(remaining_secs - duty.deep_sleep_lead_secs),
            }
        } else if remaining_secs > duty.wake_lead_secs {
            // Land exactly on the wake boundary rather than overshooting it
            let to_wake = remaining_secs - duty.wake_lead_secs;
            SamplePlan {
                phase: DutyPhase::Approach,
                posture: RadioPosture::LowPower,
                poll: secs(duty.approach_poll_secs.min(to_wake)),
            }
        } else {
            SamplePlan {
                phase: DutyPhase::Wake,
                posture: if self.locked {
                    RadioPosture::LowPower
                } else {
                    RadioPosture::HighAccuracy
                },
                poll: secs(duty.approach_poll_secs),
            }
        }
    }

    /// Offer a fix that already passed the quality gate.
    pub fn observe(&mut self, fix: &LocationFix, duty: &DutyCycle) -> Observation {
        if self.mode != PerformanceMode::Normal || self.phase != Some(DutyPhase::Wake) {
            return Observation::OutOfWindow;
        }
        if self.locked {
            return Observation::Ignored;
        }

        if fix.accuracy <= duty.excellent_accuracy_m {
            debug!(
                "Excellent fix ±{:.1} m locked; dropping to low power",
                fix.accuracy
            );
            self.held = Some(fix.clone());
            self.locked = true;
            return Observation::Locked;
        }

        match &self.held {
            Some(held) if held.accuracy <= fix.accuracy => Observation::Ignored,
            _ => {
                self.held = Some(fix.clone());
                Observation::Held
            }
        }
    }

    /// Hand over the held sample at the deadline and start a new window.
    pub fn take_deadline_sample(&mut self) -> Option<LocationFix> {
        self.locked = false;
        self.held.take()
    }

    fn clear_sample(&mut self) {
        self.held = None;
        self.locked = false;
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(accuracy: f64) -> LocationFix {
        LocationFix::builder(-33.8688, 151.2093).accuracy(accuracy).build()
    }

    fn duty() -> DutyCycle {
        DutyCycle::default()
    }

    #[test]
    fn test_fixed_modes() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::High);
        let plan = sampler.plan(250.0, &duty());
        assert_eq!(plan.phase, DutyPhase::Fixed);
        assert_eq!(plan.posture, RadioPosture::HighAccuracy);
        assert_eq!(plan.poll, Duration::from_secs(1));

        sampler.set_mode(PerformanceMode::PowerSaver);
        let plan = sampler.plan(10.0, &duty());
        assert_eq!(plan.posture, RadioPosture::LowPower);
        assert_eq!(plan.poll, Duration::from_secs(300));
    }

    #[test]
    fn test_duty_cycle_phases() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);

        let deep = sampler.plan(300.0, &duty());
        assert_eq!(deep.phase, DutyPhase::DeepSleep);
        assert_eq!(deep.posture, RadioPosture::LowPower);
        assert_eq!(deep.poll, Duration::from_secs(100));

        let approach = sampler.plan(200.0, &duty());
        assert_eq!(approach.phase, DutyPhase::Approach);
        assert_eq!(approach.posture, RadioPosture::LowPower);
        assert_eq!(approach.poll, Duration::from_secs(1));

        let edge = sampler.plan(100.5, &duty());
        assert_eq!(edge.phase, DutyPhase::Approach);
        assert_eq!(edge.poll, Duration::from_millis(500));

        let wake = sampler.plan(100.0, &duty());
        assert_eq!(wake.phase, DutyPhase::Wake);
        assert_eq!(wake.posture, RadioPosture::HighAccuracy);
        assert_eq!(wake.poll, Duration::from_secs(1));
    }

    #[test]
    fn test_fixes_outside_wake_are_not_candidates() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(150.0, &duty());
        assert_eq!(sampler.observe(&fix(5.0), &duty()), Observation::OutOfWindow);
        assert!(sampler.held().is_none());
    }

    #[test]
    fn test_wake_keeps_best_moderate_fix() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(90.0, &duty());

        assert_eq!(sampler.observe(&fix(45.0), &duty()), Observation::Held);
        assert_eq!(sampler.observe(&fix(30.0), &duty()), Observation::Held);
        assert_eq!(sampler.observe(&fix(40.0), &duty()), Observation::Ignored);
        assert_eq!(sampler.held().map(|f| f.accuracy), Some(30.0));

        // Still searching at high accuracy
        assert_eq!(
            sampler.plan(50.0, &duty()).posture,
            RadioPosture::HighAccuracy
        );
    }

    #[test]
    fn test_early_shutoff_locks_first_excellent_fix() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(90.0, &duty());

        sampler.observe(&fix(35.0), &duty());
        assert_eq!(sampler.observe(&fix(18.0), &duty()), Observation::Locked);
        assert!(sampler.is_locked());
        assert_eq!(sampler.plan(80.0, &duty()).posture, RadioPosture::LowPower);

        // Later fixes, even better ones, never replace the locked sample
        assert_eq!(sampler.observe(&fix(25.0), &duty()), Observation::Ignored);
        assert_eq!(sampler.observe(&fix(4.0), &duty()), Observation::Ignored);

        let sample = sampler.take_deadline_sample().unwrap();
        assert_eq!(sample.accuracy, 18.0);
        assert!(!sampler.is_locked());
        assert!(sampler.held().is_none());
    }

    #[test]
    fn test_excellent_boundary_is_inclusive() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(10.0, &duty());
        assert_eq!(sampler.observe(&fix(20.0), &duty()), Observation::Locked);
    }

    #[test]
    fn test_no_fix_window_yields_nothing() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(90.0, &duty());
        assert!(sampler.take_deadline_sample().is_none());
    }

    #[test]
    fn test_entering_wake_starts_fresh_window() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(90.0, &duty());
        sampler.observe(&fix(30.0), &duty());

        // Back to deep sleep (deadline handled elsewhere), then a new wake
        sampler.plan(300.0, &duty());
        sampler.plan(95.0, &duty());
        assert!(sampler.held().is_none());
    }

    #[test]
    fn test_leaving_normal_drops_sample() {
        let mut sampler = AdaptiveSampler::new(PerformanceMode::Normal);
        sampler.plan(90.0, &duty());
        sampler.observe(&fix(10.0), &duty());

        sampler.set_mode(PerformanceMode::High);
        assert!(sampler.held().is_none());
        assert_eq!(sampler.phase(), None);
    }
}
