//! REST API endpoints for waymark-service.
//!
//! Lifecycle endpoints forward to the tracker task and return the state it
//! settled in. A command the state machine refuses maps to `409 Conflict`
//! and leaves the tracker untouched.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]:
//! `{"error": "<message>"}`.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use waymark_core::{TrackerStatus, TrackingSettings};
use waymark_store::{QueueQuery, QueueStats, QueuedLocation};
use waymark_types::{DeliveryState, EntrySource, PerformanceMode, TrackingState};

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Tracker lifecycle
        .route("/api/tracking/activate", post(activate))
        .route("/api/tracking/grant", post(grant_permissions))
        .route("/api/tracking/start", post(start))
        .route("/api/tracking/stop", post(stop))
        .route("/api/tracking/pause", post(pause))
        .route("/api/tracking/resume", post(resume))
        .route("/api/tracking/restart", post(restart))
        .route("/api/tracking/log-now", post(log_now))
        .route("/api/tracking/mode", put(set_mode))
        .route("/api/tracking/timeline", put(set_timeline))
        // Runtime settings
        .route("/api/settings", get(get_settings).put(update_settings))
        // Queue inspection
        .route("/api/queue", get(list_queue))
        .route("/api/queue/{id}", get(get_queued))
        // Delivery control
        .route("/api/sync/trigger", post(sync_trigger))
        .route("/api/sync/online", put(sync_online))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Aggregate status for the host UI.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Tracker snapshot.
    pub tracker: TrackerStatus,
    /// Queue counts.
    pub queue: QueueStats,
    /// Delivery status.
    pub sync: SyncStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

/// Delivery status.
#[derive(Debug, Serialize)]
pub struct SyncStatus {
    /// Whether a sync engine is running.
    pub enabled: bool,
    /// Whether the engine considers the network reachable.
    pub online: bool,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let queue = state.store.lock().await.stats()?;
    let sync = SyncStatus {
        enabled: state.sync.is_some(),
        online: state.sync.as_ref().is_some_and(|s| s.is_online()),
    };

    Ok(Json(StatusResponse {
        tracker: state.tracker.status(),
        queue,
        sync,
        started_at: state.started_at,
    }))
}

/// State the tracker settled in after a lifecycle command.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub state: TrackingState,
}

impl StateResponse {
    fn json(state: TrackingState) -> Json<Self> {
        Json(Self { state })
    }
}

async fn activate(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.activate().await?))
}

async fn grant_permissions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.grant_permissions().await?))
}

async fn start(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.start().await?))
}

async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.stop().await?))
}

async fn pause(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.pause().await?))
}

async fn resume(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.resume().await?))
}

async fn restart(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, AppError> {
    Ok(StateResponse::json(state.tracker.restart().await?))
}

/// Row written by a manual entry.
#[derive(Debug, Serialize)]
pub struct LoggedResponse {
    pub id: i64,
}

/// Log the current fix immediately.
async fn log_now(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<LoggedResponse>), AppError> {
    let id = state.tracker.log_now().await?;
    if let Some(sync) = &state.sync {
        sync.trigger();
    }
    Ok((StatusCode::CREATED, Json(LoggedResponse { id })))
}

/// Request body for `PUT /api/tracking/mode`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: PerformanceMode,
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<ModeRequest>, AppError> {
    state.tracker.set_performance_mode(request.mode).await?;
    Ok(Json(request))
}

/// Request body for `PUT /api/tracking/timeline`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TimelineRequest {
    pub enabled: bool,
}

async fn set_timeline(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TimelineRequest>,
) -> Result<Json<TimelineRequest>, AppError> {
    state.tracker.set_timeline_logging(request.enabled).await?;
    Ok(Json(request))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<TrackingSettings> {
    Json(state.settings.current())
}

/// Replace the runtime settings; they apply from the next evaluation cycle.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<TrackingSettings>,
) -> Result<Json<TrackingSettings>, AppError> {
    let applied = state.settings.replace(settings)?;
    tracing::info!(
        "Settings updated: {} min / {} m, accuracy ceiling {} m",
        applied.time_threshold_minutes,
        applied.distance_threshold_m,
        applied.accuracy_ceiling_m
    );
    Ok(Json(applied))
}

/// Query parameters for `GET /api/queue`.
#[derive(Debug, Deserialize, Default)]
pub struct QueueParams {
    /// Delivery state (`pending`, `syncing`, `synced`, `rejected`).
    pub state: Option<String>,
    /// Entry source (`automatic`, `manual`).
    pub source: Option<String>,
    /// Unix timestamp; rows captured at or after.
    pub since: Option<i64>,
    /// Unix timestamp; rows captured at or before.
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// `asc` (delivery order) or `desc` (default).
    pub order: Option<String>,
}

impl QueueParams {
    /// Translate the parameters into a store query, fetching `extra` more rows than asked.
    pub fn to_query(&self, extra: u32) -> Result<QueueQuery, AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let mut query = QueueQuery::new();

        if let Some(state) = &self.state {
            let state = DeliveryState::from_str(state)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            query = query.state(state);
        }
        if let Some(source) = &self.source {
            let source = EntrySource::from_str(source)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            query = query.source(source);
        }
        if let Some(since) = self.since {
            query = query.since(unix_time(since, "since")?);
        }
        if let Some(until) = self.until {
            query = query.until(unix_time(until, "until")?);
        }
        match self.order.as_deref() {
            None | Some("desc") => {}
            Some("asc") => query = query.oldest_first(),
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "Invalid order '{}': expected 'asc' or 'desc'",
                    other
                )));
            }
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit.saturating_add(extra));
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }

        Ok(query)
    }
}

fn unix_time(secs: i64, name: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|_| AppError::BadRequest(format!("Invalid '{}' timestamp: {}", name, secs)))
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Maximum items requested (if specified).
    pub limit: Option<u32>,
    /// Whether more items exist past this page.
    pub has_more: bool,
}

async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueueParams>,
) -> Result<Json<PaginatedResponse<QueuedLocation>>, AppError> {
    // One extra row tells us whether there is another page
    let query = params.to_query(1)?;
    let mut rows = state.store.lock().await.query(&query)?;

    let has_more = params.limit.is_some_and(|l| rows.len() > l as usize);
    if has_more {
        rows.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: rows.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: rows,
    }))
}

async fn get_queued(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<QueuedLocation>, AppError> {
    state
        .store
        .lock()
        .await
        .get(id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Queue row not found: {}", id)))
}

async fn sync_trigger(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    let sync = state
        .sync
        .as_ref()
        .ok_or_else(|| AppError::Conflict("Delivery is not configured".to_string()))?;
    sync.trigger();
    Ok(StatusCode::ACCEPTED)
}

/// Request body for `PUT /api/sync/online`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineRequest {
    pub online: bool,
}

async fn sync_online(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OnlineRequest>,
) -> Result<Json<OnlineRequest>, AppError> {
    let sync = state
        .sync
        .as_ref()
        .ok_or_else(|| AppError::Conflict("Delivery is not configured".to_string()))?;
    sync.set_online(request.online);
    Ok(Json(request))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Store(waymark_store::Error),
    Internal(String),
}

impl From<waymark_store::Error> for AppError {
    fn from(e: waymark_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<waymark_core::Error> for AppError {
    fn from(e: waymark_core::Error) -> Self {
        use waymark_core::Error;

        match e {
            Error::InvalidCommand { .. } | Error::NoFix => AppError::Conflict(e.to_string()),
            Error::InvalidConfig(_) => AppError::BadRequest(e.to_string()),
            Error::TrackerClosed => AppError::Unavailable(e.to_string()),
            Error::Store(e) => AppError::Store(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
