//! HTTP request handlers.

use axum::{extract::State, response::IntoResponse, Json};

use super::server::AppState;
use super::types::{ChatRequest, FeedbackRequest, FeedbackResponse, ProviderInfo};
use crate::error::Error;

/// Handle POST /v1/chat
///
/// Always 200 once the prompt is accepted; provider failures show up in
/// `responses`, and a turn where every provider failed carries the "none"
/// decision.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, Error> {
    if request.prompt.trim().is_empty() {
        return Err(Error::BadRequest("prompt must not be empty".to_string()));
    }

    let outcome = state
        .orchestrator
        .orchestrate_with(&request.prompt, request.options())
        .await;

    tracing::info!(
        turn_id = %outcome.turn_id,
        winner = %outcome.decision.winner_id(),
        ensemble_score = outcome.decision.ensemble_score,
        "Chat turn complete"
    );

    Ok(Json(outcome))
}

/// Handle POST /v1/feedback
pub async fn feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, Error> {
    let record = state
        .orchestrator
        .record_feedback(&request.provider, request.rating)
        .await?;
    Ok(Json(FeedbackResponse {
        provider: request.provider,
        record,
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chorus"
    }))
}

/// Handle GET /providers - catalog plus learned performance
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.performance_snapshot();
    let registry = state.orchestrator.registry();

    let providers: Vec<ProviderInfo> = state
        .config
        .providers
        .iter()
        .map(|p| ProviderInfo {
            name: p.name.clone(),
            kind: p.kind,
            models: p.models.clone(),
            capabilities: p.capabilities.clone(),
            confidence: p.confidence,
            has_credential: registry.get(&p.name).is_some_and(|s| s.has_credential),
            performance: snapshot.get(&p.name).cloned().unwrap_or_default(),
        })
        .collect();

    Json(serde_json::json!({
        "providers": providers
    }))
}

/// Handle GET /v1/performance - raw learned records, including providers
/// known only from feedback
pub async fn performance(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.performance_snapshot())
}
