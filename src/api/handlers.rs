//! HTTP API handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::error::ChatError;
use crate::project::{ChatCompletion, ChatMessage, Usage};
use crate::session::Session;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clients, template and model name created at startup.
    pub session: Arc<Session>,
    /// Prometheus handle, when a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("session", &self.session)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl AppState {
    /// Create new app state.
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Template messages followed by the caller's messages.
    fn build_messages(&self, request: ChatRequest) -> Vec<ChatMessage> {
        let mut messages = self.session.prompt().create_messages(&request.context);
        messages.extend(request.messages);
        messages
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the session accepts chat requests.
    pub ready: bool,
    /// Session lifecycle state.
    pub state: String,
    /// Chat deployment name.
    pub model: String,
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Values for the prompt template placeholders.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Chat response body.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl From<ChatCompletion> for ChatResponse {
    fn from(completion: ChatCompletion) -> Self {
        Self {
            message: completion.message,
            finish_reason: completion.finish_reason,
            usage: completion.usage,
        }
    }
}

/// Error returned by the chat handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::RequestFailed { .. } | ChatError::EmptyResponse => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(status = %status, "Chat request failed: {}", err);
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 while the session is ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let session_state = state.session.state();
    let is_ready = state.session.is_ready();

    let response = ReadyResponse {
        ready: is_ready,
        state: session_state.to_string(),
        model: state.session.chat_model().to_string(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus metrics handler.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Chat handler - returns the complete assistant reply.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let messages = state.build_messages(request);
    let completion = state
        .session
        .chat()
        .complete(state.session.chat_model(), &messages)
        .await?;

    Ok(Json(completion.into()))
}

/// Streaming chat handler - returns the reply as NDJSON `{"delta": ...}` lines.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let messages = state.build_messages(request);
    let mut deltas = state
        .session
        .chat()
        .complete_stream(state.session.chat_model(), &messages)
        .await?;

    let lines = stream! {
        while let Some(item) = deltas.next().await {
            let line = match item {
                Ok(delta) => json!({ "delta": delta }),
                Err(e) => {
                    warn!("Chat stream interrupted: {}", e);
                    let line = json!({ "error": e.to_string() });
                    let item: Result<Bytes, Infallible> = Ok(Bytes::from(format!("{}\n", line)));
                    yield item;
                    break;
                }
            };
            yield Ok(Bytes::from(format!("{}\n", line)));
        }
    };

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
