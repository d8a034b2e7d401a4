//! Azure AI project client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use strum::{Display, EnumString};
use tracing::{debug, info, instrument, warn};

use super::chat::ChatClient;
use super::connection_string::ConnectionString;
use crate::error::ProjectError;
use crate::identity::{TokenCredential, MANAGEMENT_SCOPE};

/// API version of the project connections endpoint.
const CONNECTIONS_API_VERSION: &str = "2024-07-01-preview";

/// Connection categories the project API can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ConnectionCategory {
    /// Azure AI Services (model inference).
    #[strum(serialize = "AIServices")]
    AiServices,
    /// Azure OpenAI.
    #[strum(serialize = "AzureOpenAI")]
    AzureOpenAi,
}

/// Connection list response from the project API.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionListResponse {
    /// Connections.
    #[serde(default)]
    pub value: Vec<ConnectionResponse>,
}

/// Single connection in a list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionResponse {
    /// Connection name.
    pub name: String,
    /// Connection properties.
    pub properties: ConnectionProperties,
}

/// Properties of a project connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProperties {
    /// Category, e.g. `AIServices`.
    pub category: String,
    /// Target endpoint URL.
    pub target: String,
    /// Authentication type, e.g. `AAD` or `ApiKey`.
    #[serde(default)]
    pub auth_type: Option<String>,
    /// Whether this is the project's default connection for its category.
    #[serde(default)]
    pub is_default: bool,
}

/// A project connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Connection name.
    pub name: String,
    /// Connection category.
    pub category: String,
    /// Endpoint URL without trailing slash.
    pub endpoint: String,
    /// Authentication type.
    pub auth_type: Option<String>,
    /// Default flag.
    pub is_default: bool,
}

impl From<ConnectionResponse> for Connection {
    fn from(response: ConnectionResponse) -> Self {
        Self {
            name: response.name,
            category: response.properties.category,
            endpoint: response.properties.target.trim_end_matches('/').to_string(),
            auth_type: response.properties.auth_type,
            is_default: response.properties.is_default,
        }
    }
}

#[derive(Debug)]
struct ProjectInner {
    http: reqwest::Client,
    connection: ConnectionString,
    project_url: String,
    credential: Arc<dyn TokenCredential>,
    closed: AtomicBool,
}

/// Handle to a remote AI project. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ProjectClient {
    inner: Arc<ProjectInner>,
}

impl ProjectClient {
    /// Create a client from a `<host>;<subscription>;<resource-group>;<project>` string.
    pub fn from_connection_string(
        connection_string: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, ProjectError> {
        Self::new(connection_string.parse()?, credential)
    }

    /// Create a client for a parsed connection string.
    pub fn new(
        connection: ConnectionString,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, ProjectError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()?;

        let project_url = connection.project_url();
        info!(
            project = %connection.project_name,
            credential = %credential.kind(),
            "Created AI project client"
        );

        Ok(Self {
            inner: Arc::new(ProjectInner {
                http,
                connection,
                project_url,
                credential,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Parsed connection string.
    pub fn connection(&self) -> &ConnectionString {
        &self.inner.connection
    }

    /// Base URL of the project API.
    pub fn project_url(&self) -> &str {
        &self.inner.project_url
    }

    /// Credential used for project and inference calls.
    pub fn credential(&self) -> &Arc<dyn TokenCredential> {
        &self.inner.credential
    }

    /// List the project's connections of one category.
    #[instrument(skip(self), fields(project = %self.inner.connection.project_name))]
    pub async fn list_connections(
        &self,
        category: ConnectionCategory,
    ) -> Result<Vec<Connection>, ProjectError> {
        self.ensure_open()?;

        let token = self.inner.credential.get_token(MANAGEMENT_SCOPE).await?;
        let url = format!("{}/connections", self.inner.project_url);
        let category_name = category.to_string();

        let response = self
            .inner
            .http
            .get(&url)
            .bearer_auth(&token.token)
            .query(&[
                ("api-version", CONNECTIONS_API_VERSION),
                ("category", category_name.as_str()),
                ("includeAll", "true"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProjectError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let list: ConnectionListResponse = response.json().await.map_err(|e| {
            ProjectError::ParseError(format!("Failed to parse connections: {}", e))
        })?;

        let connections: Vec<Connection> = list
            .value
            .into_iter()
            .map(Connection::from)
            .filter(|c| c.category.eq_ignore_ascii_case(&category_name))
            .collect();

        debug!(count = connections.len(), "Listed project connections");
        Ok(connections)
    }

    /// The default connection of one category: the one flagged default, else the first.
    pub async fn default_connection(
        &self,
        category: ConnectionCategory,
    ) -> Result<Connection, ProjectError> {
        let mut connections = self.list_connections(category).await?;

        if connections.is_empty() {
            return Err(ProjectError::NoConnection {
                category: category.to_string(),
                project: self.inner.connection.project_name.clone(),
            });
        }

        let index = connections.iter().position(|c| c.is_default).unwrap_or(0);
        Ok(connections.swap_remove(index))
    }

    /// Derive a chat completions client from the project's AI Services connection.
    pub async fn chat_completions_client(&self) -> Result<ChatClient, ProjectError> {
        let connection = self.default_connection(ConnectionCategory::AiServices).await?;

        if let Some(auth_type) = &connection.auth_type {
            if !auth_type.eq_ignore_ascii_case("AAD") {
                warn!(
                    connection = %connection.name,
                    auth_type = %auth_type,
                    "Connection is not Entra ID based; using the project credential anyway"
                );
            }
        }

        let endpoint = format!("{}/models", connection.endpoint);
        info!(connection = %connection.name, endpoint = %endpoint, "Created chat completions client");

        Ok(ChatClient::new(
            endpoint,
            self.inner.http.clone(),
            Arc::clone(&self.inner.credential),
        ))
    }

    /// Release the client. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            info!(project = %self.inner.connection.project_name, "Closed AI project client");
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ProjectError> {
        if self.is_closed() {
            Err(ProjectError::Closed)
        } else {
            Ok(())
        }
    }
}
