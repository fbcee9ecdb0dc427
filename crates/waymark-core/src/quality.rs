//! Accuracy gate applied to every incoming fix.

use waymark_types::LocationFix;

/// Rejects fixes whose accuracy radius exceeds a ceiling.
///
/// The ceiling is inclusive: a fix reporting exactly the ceiling passes.
/// Runs before any timing decision, so a poor fix never becomes a baseline
/// or a held sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    ceiling_m: f64,
}

impl QualityGate {
    /// Gate with the given ceiling in meters.
    pub fn new(ceiling_m: f64) -> Self {
        Self { ceiling_m }
    }

    /// The ceiling in meters.
    pub fn ceiling(&self) -> f64 {
        self.ceiling_m
    }

    /// Whether `fix` is good enough to be considered at all.
    pub fn accept(&self, fix: &LocationFix) -> bool {
        accept(fix, self.ceiling_m)
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(50.0)
    }
}

/// Whether `fix` passes an accuracy ceiling of `ceiling_m` meters.
pub fn accept(fix: &LocationFix, ceiling_m: f64) -> bool {
    fix.accuracy.is_finite() && fix.accuracy >= 0.0 && fix.accuracy <= ceiling_m
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fix(accuracy: f64) -> LocationFix {
        LocationFix::builder(59.3293, 18.0686).accuracy(accuracy).build()
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        let gate = QualityGate::default();
        assert!(gate.accept(&fix(50.0)));
        assert!(!gate.accept(&fix(50.01)));
        assert!(gate.accept(&fix(3.0)));
    }

    #[test]
    fn test_rejects_nonsense_accuracy() {
        let gate = QualityGate::default();
        assert!(!gate.accept(&fix(f64::NAN)));
        assert!(!gate.accept(&fix(f64::INFINITY)));
        assert!(!gate.accept(&fix(-1.0)));
    }

    proptest! {
        #[test]
        fn prop_gate_matches_ceiling(accuracy in 0.0f64..500.0, ceiling in 1.0f64..200.0) {
            let gate = QualityGate::new(ceiling);
            prop_assert_eq!(gate.accept(&fix(accuracy)), accuracy <= ceiling);
        }
    }
}
