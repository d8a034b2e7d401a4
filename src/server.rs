//! Application startup and lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::error::AppError;
use crate::session::Session;
use crate::utils::shutdown_signal;

/// Application container for managing server lifecycle.
pub struct Application {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    session: Arc<Session>,
}

impl Application {
    /// Build the application: start the session, then bind the listener.
    ///
    /// No connection is accepted until the session is ready.
    pub async fn build(
        config: &Config,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let session = Session::start(config).await?;
        Self::with_session(config, Arc::new(session), metrics).await
    }

    /// Build the application around an already started session.
    pub async fn with_session(
        config: &Config,
        session: Arc<Session>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let mut state = AppState::new(Arc::clone(&session));
        if let Some(handle) = metrics {
            state = state.with_metrics(handle);
        }
        let router = create_router(state, &config.static_dir);

        let address = config.bind_address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind HTTP listener to {}: {}", address, e);
                session.shutdown();
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        info!("HTTP server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            router,
            session,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<(), AppError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then shut the session down.
    ///
    /// The session is shut down on every exit path, including serve errors.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;

        self.session.shutdown();

        if let Err(e) = &result {
            error!("HTTP server error: {}", e);
        }
        result.map_err(AppError::from)
    }
}
