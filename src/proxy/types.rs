//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestrateOptions;
use crate::storage::PerformanceRecord;

fn default_true() -> bool {
    true
}

/// Body of `POST /v1/chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub prompt: String,
    /// Skip ranking and dispatch exactly these providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub use_ensemble: bool,
}

impl ChatRequest {
    pub fn options(&self) -> OrchestrateOptions {
        OrchestrateOptions {
            providers: self.providers.clone(),
            use_ensemble: self.use_ensemble,
        }
    }
}

/// Body of `POST /v1/feedback`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackRequest {
    pub provider: String,
    /// Star rating, 1 to 5
    pub rating: u8,
}

/// Reply to `POST /v1/feedback`.
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub provider: String,
    #[serde(flatten)]
    pub record: PerformanceRecord,
}

/// One entry of `GET /providers`.
#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: crate::config::ProviderKind,
    pub models: Vec<String>,
    pub capabilities: Vec<String>,
    pub confidence: f64,
    pub has_credential: bool,
    pub performance: PerformanceRecord,
}
