use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::{HealthStatus, StreamSession, StreamStats, STREAM_CONTENT_TYPE};

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<usize>,
}

/// Map a health snapshot to the `/health` status code and body
pub fn health_response(health: &HealthStatus) -> (StatusCode, HealthResponse) {
    if !health.running {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "error",
                message: Some("Stream server is not running".to_string()),
                clients: None,
            },
        );
    }
    if !health.error.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "error",
                message: Some(health.error.clone()),
                clients: None,
            },
        );
    }
    (
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            message: None,
            clients: Some(health.subscriber_count),
        },
    )
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_response(&state.server.health());
    (status, Json(body))
}

// ============================================================================
// MJPEG stream
// ============================================================================

/// MJPEG multipart stream
///
/// Each viewer gets its own session task writing into an in-memory pipe
/// whose read half is the response body. When the client goes away the
/// body is dropped, which cancels the session's disconnect token.
pub async fn mjpeg_stream(State(state): State<Arc<AppState>>) -> Response {
    let subscription = match state.server.attach() {
        Ok(subscription) => subscription,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };

    let session = StreamSession::new(subscription);
    let id = session.id();
    let disconnect = state.shutdown.child_token();
    let on_drop = disconnect.clone().drop_guard();

    let (writer, reader) = tokio::io::duplex(state.config.get().stream.write_buffer_bytes);
    tokio::spawn(async move {
        let report = session.run(writer, disconnect).await;
        debug!("{} session report: {:?}", id, report);
    });

    let body = ReaderStream::new(reader).map(move |chunk| {
        let _ = &on_drop;
        chunk
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Latest frame as a single JPEG
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.server.latest_frame() {
        Some(frame) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            frame.data_bytes(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response(),
    }
}

// ============================================================================
// Stream control
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
        })
    }
}

/// Start capturing from the configured camera
pub async fn stream_start(State(state): State<Arc<AppState>>) -> Result<Json<ActionResponse>> {
    let index = state.config.get().camera.index;
    state.server.start(index).await?;
    Ok(ActionResponse::ok("Streaming started"))
}

/// Stop capturing and disconnect every viewer
pub async fn stream_stop(State(state): State<Arc<AppState>>) -> Json<ActionResponse> {
    state.server.stop().await;
    ActionResponse::ok("Streaming stopped")
}

pub async fn stream_status(State(state): State<Arc<AppState>>) -> Json<StreamStats> {
    Json(state.server.stats())
}

#[derive(Debug, Deserialize)]
pub struct OpenCameraRequest {
    /// Device index, defaults to the configured one
    pub index: Option<u32>,
}

/// Open (or switch to) a camera; the index is remembered for later starts
pub async fn camera_open(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenCameraRequest>,
) -> Result<Json<ActionResponse>> {
    let index = req.index.unwrap_or(state.config.get().camera.index);
    state.server.open_camera(index).await?;
    state
        .config
        .update("camera", |config| config.camera.index = index)?;
    Ok(ActionResponse::ok(format!("Camera {} opened", index)))
}

pub async fn config_get(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}

/// Fallback for unknown API paths
pub async fn not_found() -> AppError {
    AppError::NotFound("no such endpoint".to_string())
}
