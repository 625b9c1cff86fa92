//! HTTP surface: static client assets plus the signaling WebSocket

use axum::Router;
use roomcast_signaling::{signaling_router, SharedState};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the application router
///
/// `ws_path` is handled by the signaling endpoint, every other path is looked
/// up under `static_dir`.
pub fn build_router(state: Arc<SharedState>, ws_path: &str, static_dir: &Path) -> Router {
    signaling_router(state, ws_path)
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}
