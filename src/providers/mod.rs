//! Provider adapters and the per-call response record.
//!
//! An adapter turns a prompt into exactly one [`ResponseRecord`]. It never
//! fails: missing keys, rejected requests and exhausted retries all come back
//! as a record whose `error` is set.

mod chat_completions;
mod dispatcher;
mod gemini;
mod http;

pub use chat_completions::{ChatCompletionRequest, ChatMessage};
pub use dispatcher::Dispatcher;
pub use http::HttpAdapter;

use futures::future::BoxFuture;
use serde::{Serialize, Serializer};

use crate::proxy::retry::CallError;

/// Why a provider produced no usable answer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseFailure {
    #[error("API key missing")]
    MissingCredential,

    #[error("HTTP {status}: {message}")]
    Client { status: u16, message: String },

    #[error("{0}")]
    Transient(String),

    #[error("All model variants failed: {}", .0.join("; "))]
    AllVariantsFailed(Vec<String>),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No adapter registered for provider")]
    NoAdapter,

    #[error("Provider task failed: {0}")]
    TaskFailed(String),

    #[error("All providers failed")]
    NoValidResponses,
}

impl From<CallError> for ResponseFailure {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Client { status, body } => ResponseFailure::Client {
                status,
                message: body,
            },
            other => ResponseFailure::Transient(other.to_string()),
        }
    }
}

impl Serialize for ResponseFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of one provider invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub provider_id: String,
    pub content: Option<String>,
    pub latency_ms: u64,
    /// Per-provider constant, in [0, 1]
    pub declared_confidence: f64,
    pub error: Option<ResponseFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
}

impl ResponseRecord {
    pub fn success(
        provider_id: impl Into<String>,
        content: impl Into<String>,
        latency_ms: u64,
        declared_confidence: f64,
        raw_payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            content: Some(content.into()),
            latency_ms,
            declared_confidence,
            error: None,
            raw_payload,
        }
    }

    pub fn failure(provider_id: impl Into<String>, error: ResponseFailure, latency_ms: u64) -> Self {
        Self {
            provider_id: provider_id.into(),
            content: None,
            latency_ms,
            declared_confidence: 0.0,
            error: Some(error),
            raw_payload: None,
        }
    }

    /// No error and non-empty content.
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// One remote text-generation provider.
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Query the provider. Never fails; errors are reported inside the record.
    fn invoke<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, ResponseRecord>;
}
