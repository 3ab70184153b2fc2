//! One chat turn end to end: select, dispatch, decide, learn.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::ensemble::{EnsembleDecision, EnsembleSelector};
use crate::error::{Error, Result};
use crate::providers::{Dispatcher, ResponseRecord};
use crate::proxy::retry::RetryPolicy;
use crate::router::{ProviderRegistry, ProviderSelector, QueryClassifier};
use crate::storage::{self, spawn_log_write, PerformanceRecord, PerformanceStore, ResponseLog};

/// Per-turn knobs.
#[derive(Debug, Clone)]
pub struct OrchestrateOptions {
    /// Dispatch exactly these providers instead of ranking
    pub providers: Option<Vec<String>>,
    /// When false, the first successful response wins and nothing is learned
    pub use_ensemble: bool,
}

impl Default for OrchestrateOptions {
    fn default() -> Self {
        Self {
            providers: None,
            use_ensemble: true,
        }
    }
}

/// Everything one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub responses: BTreeMap<String, ResponseRecord>,
    pub decision: EnsembleDecision,
}

/// Owns every core component and the optional response log.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    selector: ProviderSelector,
    dispatcher: Dispatcher,
    ensemble: EnsembleSelector,
    store: Arc<PerformanceStore>,
    max_providers: usize,
    db: Option<SqlitePool>,
}

impl Orchestrator {
    /// Build from configuration: loads the performance file, creates one HTTP
    /// adapter per provider and opens the response log when configured.
    ///
    /// A database that fails to open is logged and the orchestrator runs
    /// without a response log.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let known: Vec<String> = config.providers.iter().map(|p| p.name.clone()).collect();
        let store = Arc::new(PerformanceStore::load(
            &config.performance.path,
            &known,
            config.performance.flush,
        ));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;
        let dispatcher = Dispatcher::from_configs(
            &config.providers,
            client,
            RetryPolicy::from(&config.dispatch),
        );

        let db = match &config.database {
            Some(database) => match storage::init_pool(&database.path).await {
                Ok(pool) => {
                    tracing::info!(path = %database.path, "Response log database ready");
                    Some(pool)
                }
                Err(e) => {
                    tracing::warn!(
                        path = %database.path,
                        error = %e,
                        "Could not open response log database, continuing without it"
                    );
                    None
                }
            },
            None => None,
        };

        let db = db.filter(|_| config.logging.log_responses);
        Ok(Self::from_parts(config, dispatcher, store, db))
    }

    /// Assemble from pre-built parts.
    pub fn from_parts(
        config: &Config,
        dispatcher: Dispatcher,
        store: Arc<PerformanceStore>,
        db: Option<SqlitePool>,
    ) -> Self {
        let registry = Arc::new(ProviderRegistry::from_configs(&config.providers));
        let classifier = Arc::new(QueryClassifier::new(&config.categories));
        let selector = ProviderSelector::new(
            registry.clone(),
            classifier,
            store.clone(),
            config.dispatch.fallback_providers.clone(),
        );

        Self {
            registry,
            selector,
            dispatcher,
            ensemble: EnsembleSelector::new(store.clone()),
            store,
            max_providers: config.dispatch.max_providers.max(1),
            db,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<PerformanceStore> {
        &self.store
    }

    pub fn db(&self) -> Option<&SqlitePool> {
        self.db.as_ref()
    }

    /// Run one turn, ranking providers unless `explicit_providers` is given.
    pub async fn orchestrate(
        &self,
        prompt: &str,
        explicit_providers: Option<Vec<String>>,
    ) -> TurnOutcome {
        self.orchestrate_with(
            prompt,
            OrchestrateOptions {
                providers: explicit_providers,
                ..OrchestrateOptions::default()
            },
        )
        .await
    }

    pub async fn orchestrate_with(&self, prompt: &str, options: OrchestrateOptions) -> TurnOutcome {
        let turn_id = Uuid::new_v4().to_string();

        // An empty explicit list means "choose for me"
        let targets = match options.providers.filter(|ids| !ids.is_empty()) {
            Some(explicit) => self.explicit_targets(explicit),
            None => self.selector.select(prompt, self.max_providers),
        };
        tracing::info!(
            turn_id = %turn_id,
            providers = ?targets,
            use_ensemble = options.use_ensemble,
            "Dispatching turn"
        );

        let responses = self.dispatcher.dispatch_all(prompt, &targets).await;

        let decision = if options.use_ensemble {
            self.ensemble.select(prompt, &responses)
        } else {
            EnsembleDecision::first_success(&targets, &responses)
        };
        self.store.flush_pending().await;

        if decision.is_no_valid_responses() {
            tracing::warn!(turn_id = %turn_id, dispatched = targets.len(), "All providers failed");
        }

        if let Some(pool) = &self.db {
            spawn_log_write(pool, log_rows(&turn_id, &responses, &decision));
        }

        TurnOutcome {
            turn_id,
            responses,
            decision,
        }
    }

    /// Keep known ids in caller order, dropping duplicates and unknowns.
    fn explicit_targets(&self, explicit: Vec<String>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        explicit
            .into_iter()
            .filter(|id| {
                if !self.registry.contains(id) {
                    tracing::warn!(provider = %id, "Ignoring unknown provider");
                    return false;
                }
                seen.insert(id.clone())
            })
            .collect()
    }

    /// Fold a 1..=5 star rating into the provider's learned score and save.
    pub async fn record_feedback(&self, provider: &str, rating: u8) -> Result<PerformanceRecord> {
        if !(1..=5).contains(&rating) {
            return Err(Error::InvalidRating(rating));
        }
        if !self.registry.contains(provider) {
            tracing::debug!(provider = %provider, "Feedback for provider outside the registry");
        }
        let record = self.store.record_feedback(provider, f64::from(rating) / 5.0);
        self.store.flush_pending().await;
        Ok(record)
    }

    pub fn performance_snapshot(&self) -> BTreeMap<String, PerformanceRecord> {
        self.store.snapshot()
    }
}

fn log_rows(
    turn_id: &str,
    responses: &BTreeMap<String, ResponseRecord>,
    decision: &EnsembleDecision,
) -> Vec<ResponseLog> {
    let timestamp = Utc::now().to_rfc3339();
    responses
        .values()
        .map(|record| ResponseLog {
            turn_id: turn_id.to_string(),
            timestamp: timestamp.clone(),
            provider: record.provider_id.clone(),
            latency_ms: record.latency_ms as i64,
            confidence: record.declared_confidence,
            success: record.is_valid(),
            error_message: record.error.as_ref().map(|e| e.to_string()),
            was_selected: record.provider_id == decision.winner_id(),
            ensemble_score: decision.all_scores.get(&record.provider_id).copied(),
        })
        .collect()
}
