//! Platform-agnostic types for the waymark location tracking core.
//!
//! This crate provides the value types shared by the durable queue
//! (waymark-store), the acquisition and delivery engines (waymark-core)
//! and any host process embedding them.
//!
//! # Features
//!
//! - [`LocationFix`]: a single positioning reading
//! - [`PerformanceMode`], [`RadioPosture`]: acquisition tuning knobs
//! - [`TrackingState`]: lifecycle of the acquisition state machine
//! - [`DeliveryState`], [`EntrySource`]: lifecycle and origin of queued rows
//! - Great-circle distance helpers
//!
//! # Example
//!
//! ```
//! use waymark_types::{LocationFix, DeliveryState};
//!
//! let fix = LocationFix::builder(52.52, 13.405).accuracy(8.0).build();
//! assert!(fix.accuracy < 20.0);
//! assert!(DeliveryState::Pending.can_transition_to(DeliveryState::Syncing));
//! ```

pub mod error;
pub mod geo;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use geo::{haversine_distance, offset_meters};
pub use types::{
    DeliveryState, EntrySource, LocationFix, LocationFixBuilder, PerformanceMode, RadioPosture,
    TrackingState,
};
