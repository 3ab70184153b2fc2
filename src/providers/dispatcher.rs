//! Concurrent fan-out of one prompt to many providers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;

use super::{HttpAdapter, ProviderAdapter, ResponseFailure, ResponseRecord};
use crate::config::ProviderConfig;
use crate::proxy::retry::RetryPolicy;

/// Maps provider ids to adapters and runs them in parallel.
#[derive(Clone, Default)]
pub struct Dispatcher {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.adapters.keys().collect();
        ids.sort();
        f.debug_struct("Dispatcher").field("adapters", &ids).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpAdapter`] per configured provider, sharing a client.
    pub fn from_configs(providers: &[ProviderConfig], client: Client, policy: RetryPolicy) -> Self {
        let mut dispatcher = Self::new();
        for config in providers {
            dispatcher.register(Arc::new(HttpAdapter::new(
                config.clone(),
                client.clone(),
                policy,
            )));
        }
        dispatcher
    }

    /// Add an adapter, replacing any previous one with the same id.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Invoke every listed provider concurrently and collect one record per
    /// distinct id. Completes when all calls have finished.
    ///
    /// Ids without an adapter yield a `NoAdapter` record rather than an error.
    pub async fn dispatch_all(&self, prompt: &str, ids: &[String]) -> BTreeMap<String, ResponseRecord> {
        let prompt: Arc<str> = Arc::from(prompt);
        let mut results = BTreeMap::new();
        let mut handles = Vec::with_capacity(ids.len());
        let started = Instant::now();

        for id in ids {
            if results.contains_key(id) || handles.iter().any(|(h, _)| h == id) {
                continue;
            }
            let Some(adapter) = self.adapters.get(id).cloned() else {
                tracing::warn!(provider = %id, "No adapter registered");
                results.insert(
                    id.clone(),
                    ResponseRecord::failure(id.as_str(), ResponseFailure::NoAdapter, 0),
                );
                continue;
            };
            let prompt = prompt.clone();
            let handle = tokio::spawn(async move { adapter.invoke(&prompt).await });
            handles.push((id.clone(), handle));
        }

        for (id, handle) in handles {
            let record = match handle.await {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(provider = %id, error = %e, "Provider task failed");
                    ResponseRecord::failure(
                        id.as_str(),
                        ResponseFailure::TaskFailed(e.to_string()),
                        started.elapsed().as_millis() as u64,
                    )
                }
            };
            results.insert(id, record);
        }

        tracing::debug!(
            providers = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch complete"
        );
        results
    }
}
