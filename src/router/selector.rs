//! Provider selection logic.

use std::sync::Arc;

use super::classifier::QueryClassifier;
use super::registry::ProviderRegistry;
use crate::storage::PerformanceStore;

/// Weight of the specialization score in the combined ranking.
const SPECIALIZATION_WEIGHT: f64 = 0.7;
/// Weight of learned performance in the combined ranking.
const PERFORMANCE_WEIGHT: f64 = 0.3;

/// One candidate's ranking breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedProvider {
    pub id: String,
    /// Count of query categories the provider declares a capability for
    pub specialization: usize,
    pub performance: f64,
    pub combined: f64,
}

/// Ranks providers for a prompt and picks a bounded subset.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    classifier: Arc<QueryClassifier>,
    store: Arc<PerformanceStore>,
    fallback: Vec<String>,
}

impl ProviderSelector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        classifier: Arc<QueryClassifier>,
        store: Arc<PerformanceStore>,
        fallback: Vec<String>,
    ) -> Self {
        Self {
            registry,
            classifier,
            store,
            fallback,
        }
    }

    /// Rank every provider with a credential, best first.
    ///
    /// Ties keep registration order (stable sort).
    pub fn rank(&self, prompt: &str) -> Vec<RankedProvider> {
        let categories = self.classifier.classify(prompt);

        let mut ranked: Vec<RankedProvider> = self
            .registry
            .available()
            .map(|spec| {
                let specialization = spec.specialization_score(categories.iter());
                let performance = self.store.score(&spec.id);
                RankedProvider {
                    id: spec.id.clone(),
                    specialization,
                    performance,
                    combined: specialization as f64 * SPECIALIZATION_WEIGHT
                        + performance * PERFORMANCE_WEIGHT,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.combined.total_cmp(&a.combined));
        ranked
    }

    /// Select at most `max_providers` (at least 1) provider ids for `prompt`.
    ///
    /// When no provider has a credential, the configured fallback list is
    /// returned instead so the turn still produces a recognizable failure.
    pub fn select(&self, prompt: &str, max_providers: usize) -> Vec<String> {
        let max_providers = max_providers.max(1);
        let ranked = self.rank(prompt);

        if ranked.is_empty() {
            let fallback: Vec<String> = self.fallback.iter().take(max_providers).cloned().collect();
            tracing::warn!(
                fallback = ?fallback,
                "No provider has a credential, using fallback providers"
            );
            return fallback;
        }

        let selected: Vec<String> = ranked
            .into_iter()
            .take(max_providers)
            .map(|r| r.id)
            .collect();

        tracing::debug!(selected = ?selected, "Selected providers");
        selected
    }
}
