//! Unified error types for the chat backend.

use std::path::PathBuf;

use thiserror::Error;

use crate::identity::CredentialKind;

/// Unified error type for startup and serving.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential error.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// AI project error.
    #[error("project error: {0}")]
    Project(#[from] ProjectError),

    /// Chat completion error.
    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    /// Prompt template error.
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Token acquisition errors.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The credential cannot be used in this environment.
    #[error("{kind} credential unavailable: {reason}")]
    Unavailable {
        /// Credential that was tried.
        kind: CredentialKind,
        /// Reason it is unavailable.
        reason: String,
    },

    /// The identity provider rejected the request.
    #[error("{kind} authentication failed: {reason}")]
    AuthenticationFailed {
        /// Credential that was tried.
        kind: CredentialKind,
        /// Reason for failure.
        reason: String,
    },

    /// The token response could not be understood.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// AI project client errors.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// Connection string is not `<host>;<subscription>;<resource-group>;<project>`.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The project has no connection of the requested category.
    #[error("no {category} connection found in project {project}")]
    NoConnection {
        /// Connection category.
        category: String,
        /// Project name.
        project: String,
    },

    /// The project API returned a non-success status.
    #[error("project request failed: HTTP {status}: {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Failed to parse a project API response.
    #[error("failed to parse project response: {0}")]
    ParseError(String),

    /// Client was used after being closed.
    #[error("project client is closed")]
    Closed,

    /// Token acquisition failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Chat completion errors.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The inference endpoint returned a non-success status.
    #[error("chat request failed: HTTP {status}: {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response contained no choices.
    #[error("chat response contained no choices")]
    EmptyResponse,

    /// Failed to parse a response or stream event.
    #[error("failed to parse chat response: {0}")]
    ParseError(String),

    /// Client was used after being closed.
    #[error("chat client is closed")]
    Closed,

    /// Token acquisition failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Prompt template errors.
#[derive(Error, Debug)]
pub enum PromptError {
    /// Template file could not be read.
    #[error("failed to read prompt template {path}: {source}")]
    Read {
        /// Template path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file does not start with a `---` front matter block.
    #[error("prompt template is missing its front matter")]
    MissingFrontMatter,

    /// Front matter is not valid YAML.
    #[error("invalid prompt front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
