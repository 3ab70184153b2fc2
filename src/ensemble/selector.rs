//! Winner selection across one turn's responses.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::scorer;
use crate::providers::{ResponseFailure, ResponseRecord};
use crate::storage::PerformanceStore;

const QUALITY_WEIGHT: f64 = 0.4;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const PERFORMANCE_WEIGHT: f64 = 0.2;
const SPEED_WEIGHT: f64 = 0.1;

/// Latency at which the speed bonus reaches zero.
const SPEED_HORIZON_MS: f64 = 10_000.0;

/// Provider id of the decision returned when nothing usable came back.
pub const NO_WINNER: &str = "none";
const NO_WINNER_CONTENT: &str = "No valid responses received";

/// Result of one ensemble round.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleDecision {
    pub winner: ResponseRecord,
    pub ensemble_score: f64,
    /// Combined score for every valid response
    pub all_scores: BTreeMap<String, f64>,
}

impl EnsembleDecision {
    pub fn no_valid_responses() -> Self {
        let mut winner = ResponseRecord::failure(NO_WINNER, ResponseFailure::NoValidResponses, 0);
        winner.content = Some(NO_WINNER_CONTENT.to_string());
        Self {
            winner,
            ensemble_score: 0.0,
            all_scores: BTreeMap::new(),
        }
    }

    /// True when no provider produced a usable answer.
    pub fn is_no_valid_responses(&self) -> bool {
        self.winner.provider_id == NO_WINNER
            && self.winner.error == Some(ResponseFailure::NoValidResponses)
    }

    pub fn winner_id(&self) -> &str {
        &self.winner.provider_id
    }

    /// The first valid response in `order`, unscored.
    ///
    /// Used when ensemble selection is turned off; the store is not updated.
    pub fn first_success(order: &[String], responses: &BTreeMap<String, ResponseRecord>) -> Self {
        order
            .iter()
            .filter_map(|id| responses.get(id))
            .find(|record| record.is_valid())
            .map(|record| Self {
                winner: record.clone(),
                ensemble_score: 0.0,
                all_scores: BTreeMap::new(),
            })
            .unwrap_or_else(Self::no_valid_responses)
    }
}

/// `max(0, 1 - latency / 10s)`
pub fn speed_score(latency_ms: u64) -> f64 {
    (1.0 - latency_ms as f64 / SPEED_HORIZON_MS).max(0.0)
}

/// Weighted blend of the four signals.
pub fn combined_score(quality: f64, confidence: f64, performance: f64, latency_ms: u64) -> f64 {
    QUALITY_WEIGHT * quality
        + CONFIDENCE_WEIGHT * confidence
        + PERFORMANCE_WEIGHT * performance
        + SPEED_WEIGHT * speed_score(latency_ms)
}

/// Picks one winner per turn and feeds the outcome back into the store.
#[derive(Debug, Clone)]
pub struct EnsembleSelector {
    store: Arc<PerformanceStore>,
}

impl EnsembleSelector {
    pub fn new(store: Arc<PerformanceStore>) -> Self {
        Self { store }
    }

    /// Score every valid response and return the best.
    ///
    /// Iteration is in provider id order and only a strictly greater score
    /// replaces the leader, so ties go to the lowest id. When nothing is valid
    /// the "none" decision is returned and the store is left untouched.
    pub fn select(&self, prompt: &str, responses: &BTreeMap<String, ResponseRecord>) -> EnsembleDecision {
        let mut all_scores = BTreeMap::new();
        let mut best: Option<(&ResponseRecord, f64)> = None;

        for (id, record) in responses.iter().filter(|(_, r)| r.is_valid()) {
            let quality = scorer::quality(record.content_str(), prompt);
            let score = combined_score(
                quality,
                record.declared_confidence,
                self.store.score(id),
                record.latency_ms,
            );
            tracing::debug!(
                provider = %id,
                quality = quality,
                score = score,
                "Scored response"
            );
            all_scores.insert(id.clone(), score);

            if best.map_or(true, |(_, top)| score > top) {
                best = Some((record, score));
            }
        }

        let Some((winner, ensemble_score)) = best else {
            tracing::warn!(responses = responses.len(), "No valid responses to select from");
            return EnsembleDecision::no_valid_responses();
        };

        let updated = self
            .store
            .record_ensemble_win(&winner.provider_id, ensemble_score);
        tracing::info!(
            winner = %winner.provider_id,
            ensemble_score = ensemble_score,
            candidates = all_scores.len(),
            learned_score = updated.score,
            "Ensemble winner selected"
        );

        EnsembleDecision {
            winner: winner.clone(),
            ensemble_score,
            all_scores,
        }
    }
}
