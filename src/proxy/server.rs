//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;
use crate::upstream::UpstreamClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub config: Arc<Config>,
}

impl AppState {
    /// Validate `config` and build state with a fresh upstream client for it.
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;
        let upstream = UpstreamClient::new(config.upstream.clone())?;
        Ok(Self {
            upstream,
            config: Arc::new(config),
        })
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until SIGINT or SIGTERM.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.listen_addr()?;

    tracing::info!(
        upstream = %config.upstream.base_url,
        locale = %config.chat.locale,
        "Upstream configured"
    );

    let state = AppState::new(config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting trae-proxy server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, draining connections");
}
