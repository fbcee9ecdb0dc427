//! WebSocket handler streaming tracker events.
//!
//! Every client first receives a `{"type": "status", ...}` snapshot, then
//! each [`TrackerEvent`] as it happens, serialized with its `type` tag.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use waymark_core::{TrackerEvent, TrackerStatus};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Snapshot<'a> {
    Status { status: &'a TrackerStatus },
}

/// Initial message sent to every client.
fn snapshot_message(status: &TrackerStatus) -> serde_json::Result<String> {
    serde_json::to_string(&Snapshot::Status { status })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing published in between is lost
    let mut rx = state.tracker.subscribe();

    info!("WebSocket client connected");

    match snapshot_message(&state.tracker.status()) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                info!("WebSocket client disconnected during initial snapshot");
                return;
            }
        }
        Err(e) => warn!("Failed to serialize status snapshot: {}", e),
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event: TrackerEvent = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!("WebSocket client lagging, skipped {} events", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!("Received ping"),
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_types::{PerformanceMode, TrackingState};

    #[test]
    fn test_snapshot_is_tagged() {
        let status = TrackerStatus {
            state: TrackingState::Active,
            mode: PerformanceMode::High,
            timeline_logging: true,
            phase: None,
            posture: None,
            last_fix: None,
            last_logged_at: None,
            last_error: None,
        };

        let json: serde_json::Value =
            serde_json::from_str(&snapshot_message(&status).unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"]["state"], "active");
        assert_eq!(json["status"]["mode"], "high");
    }

    #[test]
    fn test_events_carry_type_tag() {
        let event = TrackerEvent::StateChanged {
            state: TrackingState::Paused,
            mode: PerformanceMode::Normal,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["state"], "paused");
    }
}
