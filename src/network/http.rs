//! HTTP surface: read endpoints plus gamelog uploads.
//!
//! | Method/Path | Behavior |
//! |-------------|----------|
//! | GET `/api/status` | liveness, active game count, uptime |
//! | GET `/api/events/{match-key}` | merged events for one match |
//! | POST `/api/gamelog` | full replace of one player's stream |
//! | POST `/api/gamelog/append` | append a tail to one player's stream |
//! | OPTIONS anything | 204 (CORS is wide open) |
//!
//! Errors are JSON `{error}`: 400 on missing fields, 404 on unknown routes,
//! 500 on upload parse failures.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info};

use crate::game::aggregate::{self, MatchEvents};
use crate::game::record::parse_match_key;
use crate::state::TrackerState;

/// Bound on request handling, uploads included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `/api/status` payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Always `"ok"` when the tracker answers at all.
    pub status: &'static str,
    /// Confirmed and pending matches currently tracked.
    pub active_games: usize,
    /// Seconds since process start.
    pub uptime: u64,
}

/// Upload body for both gamelog endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamelogUpload {
    /// Uploader's bound identity.
    pub player_name: Option<String>,
    /// Gamelog text.
    pub content: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Build the API router.
pub fn router(state: Arc<TrackerState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/events/{key}", get(match_events))
        .route("/api/gamelog", post(gamelog_replace))
        .route("/api/gamelog/append", post(gamelog_append))
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

/// Serve the API until the shutdown signal fires.
pub async fn run_http(
    listener: TcpListener,
    state: Arc<TrackerState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("http listening on {:?}", listener.local_addr().ok());
    let app = router(state);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    });
    if let Err(e) = serve.await {
        debug!("http server stopped: {e}");
    }
}

async fn status(State(state): State<Arc<TrackerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        active_games: state.registry.read().await.len(),
        uptime: state.uptime_secs(),
    })
}

async fn match_events(
    State(state): State<Arc<TrackerState>>,
    Path(key): Path<String>,
) -> Response {
    let parsed = parse_match_key(&key);
    let registry = state.registry.read().await;
    let uploads = state.uploads.read().await;
    let record = parsed.and_then(|key| registry.get(&key));
    match record {
        Some(record) => Json(aggregate::match_events(record, &uploads)).into_response(),
        // Unknown match keys answer with the empty shape, not an error.
        None => Json(MatchEvents {
            game_id: 0,
            kill_feed: Vec::new(),
            chat: Vec::new(),
            timeline: Vec::new(),
            start_time: chrono::Utc::now(),
        })
        .into_response(),
    }
}

async fn gamelog_replace(
    State(state): State<Arc<TrackerState>>,
    Json(upload): Json<GamelogUpload>,
) -> Response {
    let (Some(player), Some(content)) = (upload.player_name, upload.content) else {
        return error_response(StatusCode::BAD_REQUEST, "playerName and content are required");
    };

    let result = state.uploads.write().await.replace(&player, &content);
    let events_received = match result {
        Ok(n) => n,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let total_clients = state.uploads.read().await.len();

    state.publish_summary().await;
    state.nudge_snapshot();
    debug!(player = %player, events_received, "gamelog replaced");
    Json(json!({
        "ok": true,
        "eventsReceived": events_received,
        "totalClients": total_clients,
    }))
    .into_response()
}

async fn gamelog_append(
    State(state): State<Arc<TrackerState>>,
    Json(upload): Json<GamelogUpload>,
) -> Response {
    let (Some(player), Some(content)) = (upload.player_name, upload.content) else {
        return error_response(StatusCode::BAD_REQUEST, "playerName and content are required");
    };

    let (new_events, total_events) = {
        let mut uploads = state.uploads.write().await;
        match uploads.append(&player, &content) {
            Ok(n) => (n, uploads.get(&player).map(|s| s.events.len()).unwrap_or(0)),
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    };

    state.publish_summary().await;
    state.nudge_snapshot();
    Json(json!({
        "ok": true,
        "newEvents": new_events,
        "totalEvents": total_events,
    }))
    .into_response()
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    error_response(StatusCode::NOT_FOUND, "not found")
}
