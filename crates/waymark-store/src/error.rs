//! Error types for waymark-store.

use std::path::PathBuf;

use waymark_types::DeliveryState;

/// Result type for waymark-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in waymark-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Row does not exist (purged or never inserted).
    #[error("Queued location {0} not found")]
    RowNotFound(i64),

    /// A delivery-state update did not match the row's current state.
    #[error("Queued location {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: DeliveryState,
        to: DeliveryState,
    },

    /// A persisted timestamp is outside the representable range.
    #[error("Invalid stored timestamp: {0} ms")]
    InvalidTimestamp(i64),

    /// The schema on disk is newer than this build understands.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },
}
