//! Managed identity credential.
//!
//! Two token sources are supported:
//! - the App Service / Container Apps identity endpoint (`IDENTITY_ENDPOINT`
//!   plus `IDENTITY_HEADER`)
//! - the Azure Instance Metadata Service (IMDS) everywhere else

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use super::{scope_to_resource, AccessToken, CredentialKind, TokenCache, TokenCredential};
use crate::error::CredentialError;

/// IMDS token endpoint.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where managed identity tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEndpoint {
    /// Instance Metadata Service.
    Imds,
    /// App Service / Container Apps identity endpoint.
    AppService {
        /// Value of `IDENTITY_ENDPOINT`.
        endpoint: String,
        /// Value of `IDENTITY_HEADER`.
        header: String,
    },
}

/// Token response shared by IMDS and the App Service endpoint.
#[derive(Debug, Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: String,
    /// Unix seconds, sent as a string by IMDS and as a number by some hosts.
    expires_on: Value,
}

/// Credential for workloads running with an Azure managed identity.
#[derive(Debug)]
pub struct ManagedIdentityCredential {
    client_id: Option<String>,
    endpoint: IdentityEndpoint,
    http: reqwest::Client,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    /// Create a credential, optionally for a user-assigned identity.
    pub fn new(
        client_id: Option<String>,
        endpoint: IdentityEndpoint,
    ) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client_id,
            endpoint,
            http,
            cache: TokenCache::default(),
        })
    }

    /// Client id of the user-assigned identity, if any.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn endpoint(&self) -> &IdentityEndpoint {
        &self.endpoint
    }

    #[instrument(skip(self), fields(client_id = ?self.client_id))]
    async fn request_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let resource = scope_to_resource(scope);
        let mut query = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::Imds => self
                .http
                .get(IMDS_ENDPOINT)
                .query(&[("api-version", IMDS_API_VERSION)])
                .header("Metadata", "true"),
            IdentityEndpoint::AppService { endpoint, header } => self
                .http
                .get(endpoint)
                .query(&[("api-version", APP_SERVICE_API_VERSION)])
                .header("X-IDENTITY-HEADER", header),
        };

        let response = request.query(&query).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CredentialError::Unavailable {
                    kind: CredentialKind::ManagedIdentity,
                    reason: e.to_string(),
                }
            } else {
                CredentialError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::AuthenticationFailed {
                kind: CredentialKind::ManagedIdentity,
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        let body: ManagedIdentityTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        Ok(AccessToken::new(
            body.access_token,
            parse_expires_on(&body.expires_on)?,
        ))
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ManagedIdentity
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        self.cache
            .get_or_fetch(self.kind(), scope, || self.request_token(scope))
            .await
    }
}

/// Parse `expires_on` given as unix seconds (string or number).
fn parse_expires_on(value: &Value) -> Result<DateTime<Utc>, CredentialError> {
    let seconds = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    seconds
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or_else(|| CredentialError::InvalidResponse(format!("expires_on: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expires_on_accepts_string_and_number() {
        let from_string = parse_expires_on(&json!("1735689600")).unwrap();
        let from_number = parse_expires_on(&json!(1735689600)).unwrap();

        assert_eq!(from_string, from_number);
        assert_eq!(from_string.timestamp(), 1_735_689_600);
    }

    #[test]
    fn expires_on_rejects_garbage() {
        assert!(parse_expires_on(&json!("soon")).is_err());
        assert!(parse_expires_on(&json!(null)).is_err());
    }

    #[test]
    fn keeps_client_id() {
        let credential =
            ManagedIdentityCredential::new(Some("client-123".to_string()), IdentityEndpoint::Imds)
                .unwrap();

        assert_eq!(credential.client_id(), Some("client-123"));
        assert_eq!(credential.endpoint(), &IdentityEndpoint::Imds);
        assert_eq!(credential.kind(), CredentialKind::ManagedIdentity);
    }
}
