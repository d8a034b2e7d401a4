//! Azure Developer CLI credential.
//!
//! Shells out to `azd auth token`, which reuses the developer's `azd auth login`
//! session. Only used outside production.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{instrument, warn};

use super::{AccessToken, CredentialKind, TokenCache, TokenCredential};
use crate::error::CredentialError;

/// Default `azd` executable name.
const AZD_PROGRAM: &str = "azd";

/// How long `azd auth token` may run before it is abandoned.
const AZD_TIMEOUT: Duration = Duration::from_secs(10);

/// `azd auth token --output json` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzdTokenOutput {
    token: String,
    expires_on: String,
}

/// Credential backed by the Azure Developer CLI.
#[derive(Debug)]
pub struct DeveloperCliCredential {
    tenant_id: Option<String>,
    program: String,
    timeout: Duration,
    cache: TokenCache,
}

impl DeveloperCliCredential {
    /// Create a credential, optionally scoped to a tenant.
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            tenant_id,
            program: AZD_PROGRAM.to_string(),
            timeout: AZD_TIMEOUT,
            cache: TokenCache::default(),
        }
    }

    /// Use a different `azd` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Tenant the credential is scoped to.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Arguments passed to `azd` for `scope`.
    pub fn command_args(&self, scope: &str) -> Vec<String> {
        let mut args = vec![
            "auth".to_string(),
            "token".to_string(),
            "--output".to_string(),
            "json".to_string(),
            "--scope".to_string(),
            scope.to_string(),
        ];
        if let Some(tenant_id) = &self.tenant_id {
            args.push("--tenant-id".to_string());
            args.push(tenant_id.clone());
        }
        args
    }

    #[instrument(skip(self), fields(tenant_id = ?self.tenant_id))]
    async fn request_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut command = Command::new(&self.program);
        command.args(self.command_args(scope)).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(CredentialError::Unavailable {
                    kind: CredentialKind::DeveloperCli,
                    reason: format!("'{}' was not found on PATH", self.program),
                });
            }
            Ok(Err(e)) => {
                return Err(CredentialError::Unavailable {
                    kind: CredentialKind::DeveloperCli,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CredentialError::Unavailable {
                    kind: CredentialKind::DeveloperCli,
                    reason: format!("'{}' timed out after {:?}", self.program, self.timeout),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, "azd auth token failed");
            return Err(CredentialError::AuthenticationFailed {
                kind: CredentialKind::DeveloperCli,
                reason: if stderr.is_empty() {
                    format!("azd exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        parse_token_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl TokenCredential for DeveloperCliCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::DeveloperCli
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        self.cache
            .get_or_fetch(self.kind(), scope, || self.request_token(scope))
            .await
    }
}

/// Parse the JSON printed by `azd auth token --output json`.
pub(crate) fn parse_token_output(stdout: &str) -> Result<AccessToken, CredentialError> {
    let output: AzdTokenOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| CredentialError::InvalidResponse(format!("azd output: {}", e)))?;

    let expires_on = DateTime::parse_from_rfc3339(&output.expires_on)
        .map_err(|e| {
            CredentialError::InvalidResponse(format!(
                "azd expiresOn '{}': {}",
                output.expires_on, e
            ))
        })?
        .with_timezone(&Utc);

    Ok(AccessToken::new(output.token, expires_on))
}
