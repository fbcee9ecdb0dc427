//! Location acquisition and delivery core.
//!
//! This crate turns a stream of raw position fixes into a durable, rate-limited
//! upload queue:
//!
//! - **Quality gate**: drop fixes whose reported accuracy is too poor
//! - **Threshold evaluator**: log only after enough time *and* displacement
//! - **Adaptive sampling**: duty-cycle the radio in Normal mode, waking it at
//!   high accuracy only shortly before the next log is due
//! - **Tracker**: the acquisition state machine owning the radio, the
//!   liveness indicator and the store handle
//! - **Sync engine**: drain the queue one row at a time to a remote endpoint,
//!   separating retryable technical failures from terminal rejections
//! - **Retention sweeper**: bound the queue by age and row count
//!
//! Platform specifics sit behind two capability traits,
//! [`PositioningSource`] and [`LivenessIndicator`], and delivery behind
//! [`DeliveryTransport`]. The [`mock`] module implements all three for tests
//! and headless runs. With the `http` feature, [`transport::HttpTransport`]
//! delivers over HTTPS.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio::sync::Mutex;
//! use tokio_util::sync::CancellationToken;
//! use waymark_core::mock::{MockPositioning, MockTransport, RecordingIndicator};
//! use waymark_core::{SettingsHandle, SyncEngine, Tracker};
//! use waymark_store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Mutex::new(Store::open_default()?));
//!     let settings = SettingsHandle::default();
//!     let cancel = CancellationToken::new();
//!
//!     let (tracker, handle) = Tracker::new(
//!         Arc::new(MockPositioning::new()),
//!         Arc::new(RecordingIndicator::new()),
//!         Arc::clone(&store),
//!         settings.clone(),
//!     );
//!     tracker.spawn(cancel.child_token());
//!     SyncEngine::new(store, Arc::new(MockTransport::new()), settings)
//!         .spawn(cancel.child_token());
//!
//!     handle.activate().await?;
//!     handle.grant_permissions().await?;
//!     handle.start().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod events;
pub mod indicator;
pub mod mock;
pub mod positioning;
pub mod quality;
pub mod retention;
pub mod retry;
pub mod sampler;
pub mod settings;
pub mod sync;
pub mod threshold;
pub mod tracker;
pub mod transport;

/// The store, shared between the tracker, the sync engine and the sweeper.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so every user goes
/// through the async mutex. Critical sections are single statements or
/// short transactions; the lock is never held across network I/O.
pub type SharedStore = std::sync::Arc<tokio::sync::Mutex<waymark_store::Store>>;

pub use clock::Clock;
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, GapReason, TrackerEvent};
pub use indicator::{IndicatorStatus, LivenessIndicator, LogIndicator};
pub use positioning::{PositionEvent, PositioningSource, UpdateRequest};
pub use quality::QualityGate;
pub use retention::{RetentionSweeper, SweepReport};
pub use retry::RetryConfig;
pub use sampler::{AdaptiveSampler, DutyPhase, Observation, SamplePlan};
pub use settings::{DutyCycle, SettingsHandle, TrackingSettings};
pub use sync::{DrainReport, SyncEngine, SyncHandle};
pub use threshold::{Evaluation, ThresholdEvaluator, Thresholds};
pub use tracker::{Tracker, TrackerHandle, TrackerStatus};
pub use transport::{DeliveryTransport, LocationPayload, SubmitOutcome, TransportError};

#[cfg(feature = "http")]
pub use transport::HttpTransport;

// Re-export the value types most callers need alongside the core
pub use waymark_types::{
    DeliveryState, EntrySource, LocationFix, PerformanceMode, RadioPosture, TrackingState,
};
