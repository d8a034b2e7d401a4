//! Chat completions client for Azure AI model inference.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, instrument};

use crate::error::ChatError;
use crate::identity::{TokenCredential, COGNITIVE_SERVICES_SCOPE};
use crate::metrics;

/// API version of the model inference endpoint.
const INFERENCE_API_VERSION: &str = "2024-05-01-preview";

/// Role of a chat message author.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    role: ChatRole,
    #[serde(default)]
    content: Option<String>,
}

/// Token usage reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a non-streaming completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatCompletion {
    /// Assistant reply.
    pub message: ChatMessage,
    /// Why generation stopped (`stop`, `length`, ...).
    pub finish_reason: Option<String>,
    /// Token usage.
    pub usage: Option<Usage>,
}

/// Incremental piece of a streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ChatDelta,
}

/// One parsed server-sent-events line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Deltas(Vec<ChatDelta>),
    Done,
    Ignore,
}

/// Stream of reply deltas.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send>>;

#[derive(Debug)]
struct ChatInner {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    closed: AtomicBool,
}

/// Chat completions client derived from a project. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatClient {
    inner: Arc<ChatInner>,
}

impl ChatClient {
    /// Create a client for an inference endpoint (`https://<resource>/models`).
    pub fn new(
        endpoint: impl Into<String>,
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                http,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                credential,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Inference endpoint.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Run a completion and return the first choice.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ChatError> {
        let started = Instant::now();
        let result = self.complete_inner(model, messages).await;
        metrics::record_chat_request(started, result.is_ok());
        result
    }

    async fn complete_inner(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ChatError> {
        let response = self.send(model, messages, false).await?;

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ParseError(format!("Failed to parse completion: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;

        debug!(finish_reason = ?choice.finish_reason, "Chat completion received");

        Ok(ChatCompletion {
            message: ChatMessage::new(choice.message.role, choice.message.content.unwrap_or_default()),
            finish_reason: choice.finish_reason,
            usage: body.usage,
        })
    }

    /// Run a streaming completion.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatStream, ChatError> {
        let started = Instant::now();
        let response = match self.send(model, messages, true).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_chat_request(started, false);
                return Err(e);
            }
        };
        metrics::record_chat_request(started, true);

        let deltas = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        let item: Result<ChatDelta, ChatError> = Err(ChatError::Http(e));
                        yield item;
                        finished = true;
                        break 'read;
                    }
                }

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw).into_owned();
                    match parse_sse_line(&line) {
                        Ok(SseLine::Deltas(deltas)) => {
                            for delta in deltas {
                                yield Ok(delta);
                            }
                        }
                        Ok(SseLine::Done) => {
                            finished = true;
                            break 'read;
                        }
                        Ok(SseLine::Ignore) => {}
                        Err(e) => {
                            yield Err(e);
                            finished = true;
                            break 'read;
                        }
                    }
                }
            }

            // Body ended without a trailing newline.
            if !finished && !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                match parse_sse_line(&line) {
                    Ok(SseLine::Deltas(deltas)) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Ok(SseLine::Done) | Ok(SseLine::Ignore) => {}
                    Err(e) => {
                        yield Err(e);
                    }
                }
            }
        };

        Ok(Box::pin(deltas))
    }

    async fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ChatError> {
        if self.is_closed() {
            return Err(ChatError::Closed);
        }

        let token = self
            .inner
            .credential
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await?;
        let url = format!("{}/chat/completions", self.inner.endpoint);

        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(&token.token)
            .query(&[("api-version", INFERENCE_API_VERSION)])
            .json(&CompletionRequest {
                model,
                messages,
                stream,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Release the client. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            info!(endpoint = %self.inner.endpoint, "Closed chat completions client");
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Parse one line of a server-sent-events body.
fn parse_sse_line(line: &str) -> Result<SseLine, ChatError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Ignore);
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Ignore);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::ParseError(format!("Failed to parse stream event: {}", e)))?;

    Ok(SseLine::Deltas(
        chunk
            .choices
            .into_iter()
            .map(|c| c.delta)
            .filter(|d| d.role.is_some() || d.content.is_some())
            .collect(),
    ))
}
