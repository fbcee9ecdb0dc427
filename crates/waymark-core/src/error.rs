//! Error types for waymark-core.
//!
//! Errors fall into two groups:
//!
//! | Error | Fatal | Effect |
//! |-------|-------|--------|
//! | [`Error::Store`] | yes | Tracker enters `Error`; needs restart |
//! | [`Error::StoreUnavailable`] | yes | Tracker enters `Error`; needs restart |
//! | [`Error::PositioningUnavailable`] | yes | Tracker enters `Error`; needs restart |
//! | [`Error::PermissionRevoked`] | yes | Tracker enters `Error`; needs restart |
//! | [`Error::Indicator`] | yes | Tracker enters `Error`; needs restart |
//! | [`Error::InvalidCommand`] | no | Command refused, state unchanged |
//! | [`Error::NoFix`] | no | Manual entry refused |
//! | [`Error::InvalidConfig`] | no | Settings update refused |
//!
//! Delivery failures never surface here; they are contained per row by the
//! sync engine (see [`crate::transport::TransportError`]).

use thiserror::Error;

use waymark_types::TrackingState;

/// Errors raised by the acquisition side of the core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The durable store failed.
    #[error("Storage error: {0}")]
    Store(#[from] waymark_store::Error),

    /// The store handle is not held (tracker not started).
    #[error("Store handle not held")]
    StoreUnavailable,

    /// The positioning subsystem could not be engaged or went away.
    #[error("Positioning unavailable: {0}")]
    PositioningUnavailable(String),

    /// Location permission was withdrawn while running.
    #[error("Location permission revoked")]
    PermissionRevoked,

    /// The liveness indicator could not be established.
    #[error("Liveness indicator failed: {0}")]
    Indicator(String),

    /// The command is not valid in the current state.
    #[error("Cannot {command} while {state}")]
    InvalidCommand {
        /// The refused command.
        command: &'static str,
        /// State at the time of the command.
        state: TrackingState,
    },

    /// A manual entry was requested before any usable fix arrived.
    #[error("No usable location fix available")]
    NoFix,

    /// Settings failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The tracker task is no longer running.
    #[error("Tracker is not running")]
    TrackerClosed,
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error compromises acquisition as a whole.
    ///
    /// Fatal errors move the tracker to [`TrackingState::Error`].
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::StoreUnavailable
                | Error::PositioningUnavailable(_)
                | Error::PermissionRevoked
                | Error::Indicator(_)
        )
    }
}

/// Result type alias using waymark-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
