//! HTTP API and the outbound call primitive.
//!
//! Inbound: a small JSON API over the orchestrator. Outbound: the retrying
//! JSON POST every provider adapter goes through.

mod handlers;
pub mod retry;
mod server;
pub mod stats;
pub mod types;
pub mod upstream;

pub use retry::{call_with_retry, CallError, RetryPolicy};
pub use server::{create_router, run_server, AppState};
pub use types::{ChatRequest, FeedbackRequest, FeedbackResponse, ProviderInfo};
