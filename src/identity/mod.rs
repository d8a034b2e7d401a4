//! Azure identity: token credentials and the startup credential choice.
//!
//! Exactly one credential is used per process:
//! - outside production, the Azure Developer CLI (`azd`) credential, optionally
//!   pinned to a tenant
//! - in production, the managed identity credential, optionally pinned to a
//!   user-assigned identity's client id

pub mod developer_cli;
pub mod managed_identity;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CredentialError;
use crate::metrics;

pub use developer_cli::DeveloperCliCredential;
pub use managed_identity::ManagedIdentityCredential;

/// Scope for Azure Resource Manager / AI project management calls.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Scope for Azure AI Services inference calls.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Which credential implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum CredentialKind {
    /// Azure Developer CLI (`azd auth token`).
    #[strum(serialize = "AzureDeveloperCliCredential")]
    DeveloperCli,
    /// Managed identity (IMDS or App Service identity endpoint).
    #[strum(serialize = "ManagedIdentityCredential")]
    ManagedIdentity,
}

/// A bearer token with its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Raw bearer token.
    pub token: String,
    /// Expiry instant.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// Whether the token is still usable at `now`, leaving the refresh margin.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens for Azure APIs.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Which implementation this is.
    fn kind(&self) -> CredentialKind;

    /// Get a token for `scope` (for example `https://management.azure.com/.default`).
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

/// The startup credential decision, before any credential is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSelection {
    /// Developer CLI, optionally scoped to a tenant.
    DeveloperCli { tenant_id: Option<String> },
    /// Managed identity, optionally scoped to a user-assigned client id.
    ManagedIdentity { client_id: Option<String> },
}

impl CredentialSelection {
    /// Pick the credential for this configuration.
    pub fn from_config(config: &Config) -> Self {
        if config.is_production() {
            Self::ManagedIdentity {
                client_id: config.client_id().map(str::to_string),
            }
        } else {
            Self::DeveloperCli {
                tenant_id: config.tenant_id().map(str::to_string),
            }
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::DeveloperCli { .. } => CredentialKind::DeveloperCli,
            Self::ManagedIdentity { .. } => CredentialKind::ManagedIdentity,
        }
    }
}

impl fmt::Display for CredentialSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeveloperCli { tenant_id: Some(id) } => write!(f, "{} (tenant {})", self.kind(), id),
            Self::ManagedIdentity { client_id: Some(id) } => {
                write!(f, "{} (client {})", self.kind(), id)
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}

/// The credential used by this process.
#[derive(Debug)]
pub enum AzureCredential {
    DeveloperCli(DeveloperCliCredential),
    ManagedIdentity(ManagedIdentityCredential),
}

impl AzureCredential {
    /// Build the credential chosen for this configuration.
    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        let selection = CredentialSelection::from_config(config);
        match &selection {
            CredentialSelection::DeveloperCli { tenant_id } => {
                match tenant_id {
                    Some(id) => info!(tenant_id = %id, "Using AzureDeveloperCliCredential"),
                    None => info!("Using AzureDeveloperCliCredential"),
                }
                Ok(Self::DeveloperCli(DeveloperCliCredential::new(tenant_id.clone())))
            }
            CredentialSelection::ManagedIdentity { client_id } => {
                info!(client_id = ?client_id, "Using ManagedIdentityCredential");
                let endpoint = match (config.identity_endpoint(), config.identity_header()) {
                    (Some(endpoint), Some(header)) => {
                        managed_identity::IdentityEndpoint::AppService {
                            endpoint: endpoint.to_string(),
                            header: header.to_string(),
                        }
                    }
                    _ => managed_identity::IdentityEndpoint::Imds,
                };
                Ok(Self::ManagedIdentity(ManagedIdentityCredential::new(
                    client_id.clone(),
                    endpoint,
                )?))
            }
        }
    }
}

#[async_trait]
impl TokenCredential for AzureCredential {
    fn kind(&self) -> CredentialKind {
        match self {
            Self::DeveloperCli(c) => c.kind(),
            Self::ManagedIdentity(c) => c.kind(),
        }
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        match self {
            Self::DeveloperCli(c) => c.get_token(scope).await,
            Self::ManagedIdentity(c) => c.get_token(scope).await,
        }
    }
}

/// Per-scope token cache shared by the credential implementations.
///
/// Each scope has its own slot lock, so a slow fetch for one scope never
/// delays cache hits for another. Concurrent callers of one scope share a
/// single fetch.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    slots: Mutex<HashMap<String, Arc<Mutex<Option<AccessToken>>>>>,
}

impl TokenCache {
    /// Return the cached token for `scope`, or fetch and cache a new one.
    pub(crate) async fn get_or_fetch<F, Fut>(
        &self,
        kind: CredentialKind,
        scope: &str,
        fetch: F,
    ) -> Result<AccessToken, CredentialError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, CredentialError>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(scope.to_string()).or_default())
        };

        let mut cached = slot.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        debug!(%kind, scope, "Requesting access token");
        metrics::record_token_request(kind);
        let token = fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Resource URI for a `/.default` scope.
pub(crate) fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}
