//! Azure AI project access.
//!
//! This module handles:
//! - Connection string parsing
//! - The project client and its connection listing
//! - The chat completions client derived from the project

pub mod chat;
pub mod client;
pub mod connection_string;

pub use chat::{ChatClient, ChatCompletion, ChatDelta, ChatMessage, ChatRole, ChatStream, Usage};
pub use client::{Connection, ConnectionCategory, ProjectClient};
pub use connection_string::ConnectionString;
