//! Periodic queue housekeeping.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SharedStore;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::settings::SettingsHandle;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Rows removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows older than the retention horizon.
    pub purged: usize,
    /// Rows evicted to honor the row cap.
    pub evicted: usize,
}

/// Applies the retention horizon and the row cap on a timer.
pub struct RetentionSweeper {
    store: SharedStore,
    settings: SettingsHandle,
    clock: Clock,
    every: Duration,
}

impl RetentionSweeper {
    pub fn new(store: SharedStore, settings: SettingsHandle) -> Self {
        Self {
            store,
            settings,
            clock: Clock::system(),
            every: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Use `clock` for wall-clock time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sweep every `every` instead of hourly.
    pub fn with_interval(mut self, every: Duration) -> Self {
        self.every = every;
        self
    }

    /// Run one sweep with the current settings.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let settings = self.settings.current();
        let cutoff = self
            .clock
            .now()
            .checked_sub(settings.retention())
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "retention of {} days reaches before the calendar",
                    settings.retention_days
                ))
            })?;

        let store = self.store.lock().await;
        let purged = store.purge_older_than(cutoff)?;
        let evicted = store.enforce_row_cap(settings.max_queued_rows)?;

        Ok(SweepReport { purged, evicted })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Sweep immediately, then on every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Retention sweeper started (every {:?})", self.every);
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention sweeper cancelled, shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.purged + report.evicted > 0 => info!(
                            "Retention sweep removed {} expired and {} excess rows",
                            report.purged, report.evicted
                        ),
                        Ok(_) => debug!("Retention sweep: nothing to remove"),
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
