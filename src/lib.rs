//! Chat-completion backend for an Azure AI Foundry project.
//!
//! On startup the service picks a credential (Azure Developer CLI locally,
//! managed identity in production), opens a client to the AI project, derives
//! a chat completions client from it, and loads a prompt template. These live
//! in a [`session::Session`] shared with every request handler and closed when
//! the server stops.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`identity`]: Token credentials and the credential choice
//! - [`project`]: AI project and chat completions clients
//! - [`prompt`]: Prompty templates
//! - [`session`]: Startup and teardown of the shared clients
//! - [`api`]: HTTP API for chat, health, metrics and static files
//! - [`server`]: Application factory and serve loop
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod project;
pub mod prompt;
pub mod server;
pub mod session;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use server::Application;
pub use session::Session;
