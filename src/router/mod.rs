//! Router module for provider selection.
//!
//! This module decides which providers see a prompt, based on:
//! - Query categories inferred from keyword patterns
//! - Provider capability tags and credential availability
//! - Learned per-provider performance

mod classifier;
mod registry;
mod selector;

pub use classifier::{default_categories, QueryCategorySet, QueryClassifier, GENERAL_CATEGORY};
pub use registry::{ProviderRegistry, ProviderSpec};
pub use selector::{ProviderSelector, RankedProvider};
