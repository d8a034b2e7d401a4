//! HTTP API route definitions.

use std::path::Path;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers::{chat, chat_stream, health, metrics, ready, AppState};

/// URL prefix of the static file mount.
pub const STATIC_PREFIX: &str = "/static";

/// Create the API router.
pub fn create_router(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // Chat endpoints
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .nest_service(STATIC_PREFIX, ServeDir::new(static_dir.as_ref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
