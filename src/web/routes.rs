use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::handlers;
use crate::state::AppState;

/// Create the stream server router
pub fn create_router(state: Arc<AppState>) -> Router {
    let config = state.config.get();

    // Viewer-facing endpoints stay at the root so plain <img src="/stream"> works
    let stream_routes = Router::new()
        .route("/stream", get(handlers::mjpeg_stream))
        .route("/snapshot", get(handlers::snapshot))
        .route("/health", get(handlers::health_check));

    let api_routes = Router::new()
        .route("/stream/status", get(handlers::stream_status))
        .route("/stream/start", post(handlers::stream_start))
        .route("/stream/stop", post(handlers::stream_stop))
        .route("/camera/open", post(handlers::camera_open))
        .route("/config", get(handlers::config_get))
        .fallback(handlers::not_found);

    let mut router = Router::new()
        .merge(stream_routes)
        .nest("/api", api_routes);

    if let Some(dir) = config.web.static_dir.as_deref() {
        if Path::new(dir).is_dir() {
            info!("Serving static files from {}", dir);
            router = router.fallback_service(ServeDir::new(dir));
        } else {
            warn!("Static directory {} not found, not serving it", dir);
        }
    }

    let router = router.layer(TraceLayer::new_for_http());
    let router = if config.web.cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
    } else {
        router
    };

    router.with_state(state)
}

/// Router for the standalone viewer page server
pub fn create_viewer_router(static_dir: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}
