//! chorus - multi-provider LLM routing with learned ensemble selection
//!
//! A prompt is classified by keyword, routed to the providers best suited
//! for it, answered by all of them concurrently, and the single best answer
//! is picked by a weighted score. Each pick (and each explicit user rating)
//! nudges that provider's learned score, which feeds the next routing
//! decision.

pub mod config;
pub mod ensemble;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod proxy;
pub mod router;
pub mod storage;

pub use config::Config;
pub use ensemble::{EnsembleDecision, EnsembleSelector};
pub use error::{Error, Result};
pub use orchestrator::{OrchestrateOptions, Orchestrator, TurnOutcome};
pub use providers::{ProviderAdapter, ResponseFailure, ResponseRecord};
