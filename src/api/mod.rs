//! HTTP API module for chat, health, metrics, and static endpoints.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::{create_router, STATIC_PREFIX};
