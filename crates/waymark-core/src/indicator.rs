//! Platform liveness indicator (the persistent "tracking" notification).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use waymark_types::PerformanceMode;

use crate::error::Result;

/// What the indicator should currently say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndicatorStatus {
    /// Acquisition is being brought up.
    Starting,
    /// Acquiring in the given mode.
    Tracking { mode: PerformanceMode },
    /// Resident but not acquiring.
    Paused,
    /// Stopped on a fault; waiting for a restart.
    Faulted { message: String },
}

/// The host's liveness signal.
///
/// The platform requires this surface to be up before the radio is engaged;
/// the tracker always calls [`show`](Self::show) before requesting updates.
#[async_trait]
pub trait LivenessIndicator: Send + Sync {
    /// Establish or update the indicator.
    async fn show(&self, status: IndicatorStatus) -> Result<()>;

    /// Remove the indicator.
    async fn retract(&self) -> Result<()>;
}

/// Indicator that only logs; for headless hosts.
#[derive(Debug, Default, Clone)]
pub struct LogIndicator;

#[async_trait]
impl LivenessIndicator for LogIndicator {
    async fn show(&self, status: IndicatorStatus) -> Result<()> {
        info!("Indicator: {:?}", status);
        Ok(())
    }

    async fn retract(&self) -> Result<()> {
        info!("Indicator retracted");
        Ok(())
    }
}
