//! Wall-clock time derived from the tokio timer.
//!
//! Acquisition and delivery both compare wall-clock timestamps (fix capture
//! times, row decision times) with timer deadlines. Deriving the wall clock
//! from [`tokio::time::Instant`] keeps the two consistent, including under
//! a paused test runtime.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

/// A wall clock anchored to a tokio instant.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: OffsetDateTime,
    origin: Instant,
}

impl Clock {
    /// Clock anchored at the current system time.
    pub fn system() -> Self {
        Self::starting_at(OffsetDateTime::now_utc())
    }

    /// Clock reading `wall` right now.
    pub fn starting_at(wall: OffsetDateTime) -> Self {
        Self {
            wall,
            origin: Instant::now(),
        }
    }

    /// Current wall-clock time.
    pub fn now(&self) -> OffsetDateTime {
        self.wall + self.origin.elapsed()
    }

    /// Wall-clock time of a timer instant.
    pub fn at(&self, instant: Instant) -> OffsetDateTime {
        self.wall + instant.saturating_duration_since(self.origin)
    }

    /// Timer instant for a wall-clock time (never earlier than the anchor).
    pub fn instant_for(&self, wall: OffsetDateTime) -> Instant {
        let offset = wall - self.wall;
        if offset.is_negative() {
            return self.origin;
        }
        self.origin + Duration::try_from(offset).unwrap_or(Duration::ZERO)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let start = datetime!(2026-03-01 09:00 UTC);
        let clock = Clock::starting_at(start);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + time::Duration::seconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_round_trip() {
        let start = datetime!(2026-03-01 09:00 UTC);
        let clock = Clock::starting_at(start);

        let later = start + time::Duration::minutes(5);
        let instant = clock.instant_for(later);
        assert_eq!(clock.at(instant), later);

        // Times before the anchor clamp to it
        let earlier = clock.instant_for(start - time::Duration::minutes(1));
        assert_eq!(clock.at(earlier), start);
    }
}
