//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::AppError;
use crate::project::ConnectionString;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Execution Mode ===
    /// Any non-empty value switches to production (managed identity, no `.env`).
    #[serde(default)]
    pub running_in_production: Option<String>,

    // === Identity ===
    /// Tenant for the developer CLI credential.
    #[serde(default)]
    pub azure_tenant_id: Option<String>,

    /// Client id of the user-assigned managed identity.
    #[serde(default)]
    pub azure_client_id: Option<String>,

    /// App Service / Container Apps identity endpoint.
    #[serde(default)]
    pub identity_endpoint: Option<String>,

    /// Secret header value paired with `identity_endpoint`.
    #[serde(default)]
    pub identity_header: Option<String>,

    // === AI Project ===
    /// `<host>;<subscription>;<resource-group>;<project>`.
    pub azure_aiproject_connection_string: String,

    /// Chat model deployment name.
    pub azure_ai_chat_deployment_name: String,

    // === Server Configuration ===
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served under `/static`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8003
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Non-empty trimmed value, or `None`.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Whether the mode flag in the process environment selects production.
pub fn production_flag_set() -> bool {
    std::env::var("RUNNING_IN_PRODUCTION")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Outside production the `.env` file is read first and overrides
    /// variables already present in the environment.
    pub fn load() -> Result<Self, AppError> {
        if !production_flag_set() {
            tracing::info!("Loading .env file");
            dotenvy::dotenv_override().ok();
        }
        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build and validate a configuration from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config: Config =
            envy::from_iter(vars.into_iter().map(|(k, v)| (k.into(), v.into())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.azure_aiproject_connection_string.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "AZURE_AIPROJECT_CONNECTION_STRING is required".to_string(),
            ));
        }

        if self.azure_ai_chat_deployment_name.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "AZURE_AI_CHAT_DEPLOYMENT_NAME is required".to_string(),
            ));
        }

        self.connection_string()?;

        if self.identity_endpoint().is_some() != self.identity_header().is_some() {
            return Err(AppError::InvalidConfig(
                "IDENTITY_ENDPOINT and IDENTITY_HEADER must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the service runs in production.
    pub fn is_production(&self) -> bool {
        non_empty(&self.running_in_production).is_some()
    }

    /// Tenant id, if one was supplied.
    pub fn tenant_id(&self) -> Option<&str> {
        non_empty(&self.azure_tenant_id)
    }

    /// Managed identity client id, if one was supplied.
    pub fn client_id(&self) -> Option<&str> {
        non_empty(&self.azure_client_id)
    }

    pub fn identity_endpoint(&self) -> Option<&str> {
        non_empty(&self.identity_endpoint)
    }

    pub fn identity_header(&self) -> Option<&str> {
        non_empty(&self.identity_header)
    }

    /// Parsed project connection string.
    pub fn connection_string(&self) -> Result<ConnectionString, AppError> {
        Ok(self.azure_aiproject_connection_string.parse()?)
    }

    /// Configured chat deployment name.
    pub fn chat_model(&self) -> &str {
        self.azure_ai_chat_deployment_name.trim()
    }

    /// Log filter directives from `RUST_LOG`, `.env` included.
    pub fn log_filter(&self) -> &str {
        match self.rust_log.trim() {
            "" => "info",
            filter => filter,
        }
    }

    /// `host:port` string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
