//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::{handlers, stats};
use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let max_turns = state.config.server.max_concurrent_turns.max(1);

    Router::new()
        .route(
            "/v1/chat",
            post(handlers::chat).layer(ConcurrencyLimitLayer::new(max_turns)),
        )
        .route("/v1/feedback", post(handlers::feedback))
        .route("/v1/performance", get(handlers::performance))
        .route("/v1/stats/providers", get(stats::provider_stats_handler))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let orchestrator = Orchestrator::from_config(&config).await?;

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chorus server");

    axum::serve(listener, app).await?;

    Ok(())
}
