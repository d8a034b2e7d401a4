//! Process-wide session: the clients and template every request handler uses.
//!
//! A [`Session`] exists only once startup has fully succeeded, so the
//! uninitialized state is unrepresentable. Shutting it down closes the project
//! client and then the chat client, exactly once each. Dropping a session shuts
//! it down, and a failed startup releases whatever it had already opened.

use std::path::Path;
use std::sync::Arc;

use strum::Display;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{AppError, PromptError};
use crate::identity::{AzureCredential, TokenCredential};
use crate::project::{ChatClient, ProjectClient};
use crate::prompt::PromptTemplate;

/// Lifecycle of a started session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Ready,
    ShutDown,
}

/// Releases client handles on drop unless disarmed.
#[derive(Debug, Default)]
pub struct ClientGuard {
    project: Option<ProjectClient>,
    chat: Option<ChatClient>,
}

impl ClientGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the project client.
    pub fn set_project(&mut self, project: ProjectClient) {
        self.project = Some(project);
    }

    /// Track the chat client.
    pub fn set_chat(&mut self, chat: ChatClient) {
        self.chat = Some(chat);
    }

    /// Close the tracked clients, project first. Returns how many were closed.
    pub fn release(&mut self) -> usize {
        let mut closed = 0;
        if let Some(project) = self.project.take() {
            closed += usize::from(project.close());
        }
        if let Some(chat) = self.chat.take() {
            closed += usize::from(chat.close());
        }
        closed
    }

    /// Stop tracking the clients without closing them.
    pub fn disarm(mut self) {
        self.project = None;
        self.chat = None;
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let closed = self.release();
        if closed > 0 {
            info!(closed, "Released clients from incomplete startup");
        }
    }
}

/// Shared state created once at startup.
#[derive(Debug)]
pub struct Session {
    project: ProjectClient,
    chat: ChatClient,
    prompt: PromptTemplate,
    chat_model: String,
}

impl Session {
    /// Start a session with the credential chosen for `config` and the default template.
    pub async fn start(config: &Config) -> Result<Self, AppError> {
        let credential: Arc<dyn TokenCredential> = Arc::new(AzureCredential::from_config(config)?);
        Self::start_loading(config, credential, PromptTemplate::load_default).await
    }

    /// Start a session with an explicit credential and template path.
    pub async fn start_with(
        config: &Config,
        credential: Arc<dyn TokenCredential>,
        prompt_path: &Path,
    ) -> Result<Self, AppError> {
        Self::start_loading(config, credential, || PromptTemplate::from_prompty(prompt_path)).await
    }

    /// The template is loaded after the chat client exists.
    async fn start_loading<F>(
        config: &Config,
        credential: Arc<dyn TokenCredential>,
        load_prompt: F,
    ) -> Result<Self, AppError>
    where
        F: FnOnce() -> Result<PromptTemplate, PromptError>,
    {
        let mut guard = ClientGuard::new();

        let project = ProjectClient::new(config.connection_string()?, credential)?;
        guard.set_project(project.clone());

        let chat = project.chat_completions_client().await.map_err(|e| {
            error!("Failed to create chat completions client: {}", e);
            e
        })?;
        guard.set_chat(chat.clone());

        let prompt = load_prompt().map_err(|e| {
            error!("Failed to load prompt template: {}", e);
            e
        })?;

        guard.disarm();

        let chat_model = config.chat_model().to_string();
        info!(model = %chat_model, "Session ready");

        Ok(Self {
            project,
            chat,
            prompt,
            chat_model,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        project: ProjectClient,
        chat: ChatClient,
        prompt: PromptTemplate,
        chat_model: &str,
    ) -> Self {
        Self {
            project,
            chat,
            prompt,
            chat_model: chat_model.to_string(),
        }
    }

    pub fn project(&self) -> &ProjectClient {
        &self.project
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    /// Configured chat deployment name.
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn state(&self) -> SessionState {
        if self.project.is_closed() || self.chat.is_closed() {
            SessionState::ShutDown
        } else {
            SessionState::Ready
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Close the project client, then the chat client. Idempotent.
    pub fn shutdown(&self) {
        let project_closed = self.project.close();
        let chat_closed = self.chat.close();
        if project_closed || chat_closed {
            info!("Session shut down");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
