//! Backoff policy for technical delivery failures.
//!
//! A technically failed row returns to `pending` with a `next_attempt_at`
//! computed here. There is no attempt limit; the retention horizon is the
//! only thing that ends a row's retries.
//!
//! ```
//! use std::time::Duration;
//! use waymark_core::RetryConfig;
//!
//! let config = RetryConfig::default().jitter(false);
//! assert_eq!(config.delay_for_failure(1), Duration::from_secs(2));
//! assert_eq!(config.delay_for_failure(2), Duration::from_secs(4));
//! assert_eq!(config.delay_for_failure(20), Duration::from_secs(90));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::settings::MAX_INTERVAL_SECS;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failure, in seconds.
    pub initial_delay_secs: f64,
    /// Upper bound for any delay, in seconds.
    pub max_delay_secs: f64,
    /// Growth factor per consecutive failure (1.0 = constant delay).
    pub backoff_multiplier: f64,
    /// Whether to spread delays randomly (up to 25% shorter).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 2.0,
            max_delay_secs: 90.0,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Constant delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_delay_secs: delay.as_secs_f64(),
            max_delay_secs: delay.as_secs_f64(),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_secs = delay.as_secs_f64();
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_secs = delay.as_secs_f64();
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before the next attempt after `failures` technical failures (1-based).
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let base_delay = self.initial_delay_secs * self.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_secs).max(0.0);

        let final_delay = if self.jitter {
            // Jitter only shortens, so the cap holds
            let jitter_factor = 1.0 - (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    pub(crate) fn problems(&self) -> Vec<(String, String)> {
        let mut problems = Vec::new();

        if !(self.initial_delay_secs.is_finite() && self.initial_delay_secs >= 0.0) {
            problems.push((
                "retry.initial_delay_secs".to_string(),
                "must be a non-negative number of seconds".to_string(),
            ));
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < self.initial_delay_secs {
            problems.push((
                "retry.max_delay_secs".to_string(),
                format!(
                    "must be at least initial_delay_secs ({})",
                    self.initial_delay_secs
                ),
            ));
        } else if self.max_delay_secs > MAX_INTERVAL_SECS {
            problems.push((
                "retry.max_delay_secs".to_string(),
                "must be at most one day".to_string(),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            problems.push((
                "retry.backoff_multiplier".to_string(),
                "must be at least 1.0".to_string(),
            ));
        }

        problems
    }
}
