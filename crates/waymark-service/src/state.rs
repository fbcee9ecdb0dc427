//! Application state shared across handlers.
//!
//! Handlers never touch the tracker's internals: lifecycle commands go
//! through the [`TrackerHandle`] and are answered by the tracker task, so
//! the API observes exactly the transitions the state machine accepts.

use std::sync::Arc;

use time::OffsetDateTime;
use waymark_core::{SettingsHandle, SharedStore, SyncHandle, TrackerHandle};

/// Shared application state.
pub struct AppState {
    /// The queue (shared with the tracker, sync engine and sweeper).
    pub store: SharedStore,
    /// Command channel to the tracker task.
    pub tracker: TrackerHandle,
    /// Runtime-mutable tracking settings.
    pub settings: SettingsHandle,
    /// Sync engine control, absent when delivery is not configured.
    pub sync: Option<SyncHandle>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        store: SharedStore,
        tracker: TrackerHandle,
        settings: SettingsHandle,
        sync: Option<SyncHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tracker,
            settings,
            sync,
            started_at: OffsetDateTime::now_utc(),
        })
    }
}
