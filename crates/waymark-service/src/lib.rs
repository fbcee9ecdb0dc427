//! Headless host and local control API for the waymark tracker.
//!
//! This crate provides a service that:
//! - Runs the acquisition state machine against a positioning source
//!   (a replayed track when no platform radio is available)
//! - Queues accepted fixes durably and delivers them to a remote endpoint
//! - Sweeps the queue by age and row count
//! - Exposes a REST API to drive the tracker and inspect the queue
//! - Streams tracker events over a WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Tracker state, mode, timeline flag and queue counts
//! - `POST /api/tracking/{activate,grant,start,stop,pause,resume,restart}` - Lifecycle commands
//! - `POST /api/tracking/log-now` - Queue the current fix as a manual entry
//! - `PUT /api/tracking/mode` - Switch performance mode
//! - `PUT /api/tracking/timeline` - Enable or disable timeline logging
//! - `GET /api/settings`, `PUT /api/settings` - Runtime-mutable thresholds
//! - `GET /api/queue` - Query queued rows with filters
//! - `GET /api/queue/{id}` - One queued row
//! - `POST /api/sync/trigger`, `PUT /api/sync/online` - Delivery control
//! - `WS /api/ws` - Real-time tracker events
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/waymark/service.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8480"
//!
//! [storage]
//! path = "~/.local/share/waymark/queue.db"
//!
//! [tracking]
//! mode = "normal"
//! timeline_logging = true
//! autostart = true
//! time_threshold_minutes = 5.0
//! distance_threshold_m = 15.0
//!
//! [sync]
//! endpoint = "https://example.com/api/locations"
//! token = "secret"
//!
//! [positioning]
//! replay = "~/tracks/commute.jsonl"
//! ```

use std::sync::Arc;

use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;
use waymark_core::{EventReceiver, SyncHandle, TrackerEvent};

pub mod api;
pub mod config;
pub mod replay;
pub mod state;
pub mod ws;

pub use config::{
    Config, ConfigError, PositioningConfig, ServerConfig, StorageConfig, SyncConfig,
    TrackingConfig, ValidationError,
};
pub use replay::{ReplayError, ReplayOptions, ReplayPositioning};
pub use state::AppState;

/// Build the full HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Wake the sync engine whenever the tracker queues a row.
///
/// A lagged receiver may have missed a `FixLogged`, so it triggers too.
pub fn forward_logged_fixes(
    mut events: EventReceiver,
    sync: SyncHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(TrackerEvent::FixLogged { id, .. }) => {
                        debug!("Row {} queued, waking sync", id);
                        sync.trigger();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => sync.trigger(),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
