//! Config-driven HTTP adapter covering both wire formats.

use std::time::Instant;

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use super::{chat_completions, gemini, ProviderAdapter, ResponseFailure, ResponseRecord};
use crate::config::{ApiKey, ProviderConfig, ProviderKind};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::upstream::{self, UpstreamRequest};

/// Adapter for one configured provider.
///
/// Model variants are tried in declaration order; the first success wins.
pub struct HttpAdapter {
    config: ProviderConfig,
    client: Client,
    policy: RetryPolicy,
}

impl HttpAdapter {
    pub fn new(config: ProviderConfig, client: Client, policy: RetryPolicy) -> Self {
        Self {
            config,
            client,
            policy,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn static_headers(&self) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name '{}'", name))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header '{}'", name))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn build_request(
        &self,
        key: &ApiKey,
        model: Option<&str>,
        prompt: &str,
    ) -> Result<UpstreamRequest, String> {
        let headers = self.static_headers()?;
        match self.config.kind {
            ProviderKind::ChatCompletions => chat_completions::build_request(
                &self.config.url,
                headers,
                key,
                model,
                prompt,
                self.config.max_tokens,
            ),
            ProviderKind::Gemini => {
                let model = model.ok_or_else(|| "gemini provider has no model".to_string())?;
                gemini::build_request(&self.config.url, headers, key, model, prompt)
            }
        }
    }

    fn extract_content(&self, payload: &serde_json::Value) -> String {
        match self.config.kind {
            ProviderKind::ChatCompletions => chat_completions::extract_content(payload),
            ProviderKind::Gemini => gemini::extract_content(payload),
        }
    }

    /// One model variant under the retry policy.
    async fn call_variant(
        &self,
        key: &ApiKey,
        model: Option<&str>,
        prompt: &str,
    ) -> Result<serde_json::Value, ResponseFailure> {
        let request = self
            .build_request(key, model, prompt)
            .map_err(ResponseFailure::InvalidRequest)?;
        let target = match model {
            Some(model) => format!("{}/{}", self.config.name, model),
            None => self.config.name.clone(),
        };
        upstream::send(&self.client, &self.policy, &target, &request)
            .await
            .map_err(ResponseFailure::from)
    }

    async fn run(&self, prompt: &str) -> ResponseRecord {
        let name = self.config.name.as_str();
        let Some(key) = self.config.api_key.as_ref() else {
            tracing::debug!(provider = %name, "No API key configured, skipping call");
            return ResponseRecord::failure(name, ResponseFailure::MissingCredential, 0);
        };

        let variants: Vec<Option<&str>> = if self.config.models.is_empty() {
            vec![None]
        } else {
            self.config.models.iter().map(|m| Some(m.as_str())).collect()
        };

        let start = Instant::now();
        let mut failures: Vec<(Option<&str>, ResponseFailure)> = Vec::new();

        for model in variants.iter().copied() {
            // Success latency covers the answering variant only
            let variant_start = Instant::now();
            match self.call_variant(key, model, prompt).await {
                Ok(payload) => {
                    let content = self.extract_content(&payload);
                    let latency_ms = variant_start.elapsed().as_millis() as u64;
                    tracing::debug!(
                        provider = %name,
                        model = model.unwrap_or("-"),
                        latency_ms = latency_ms,
                        "Provider call succeeded"
                    );
                    return ResponseRecord::success(
                        name,
                        content,
                        latency_ms,
                        self.config.confidence,
                        Some(payload),
                    );
                }
                Err(err) => {
                    tracing::debug!(
                        provider = %name,
                        model = model.unwrap_or("-"),
                        error = %err,
                        "Model variant failed"
                    );
                    failures.push((model, err));
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        let error = if failures.len() == 1 {
            failures.remove(0).1
        } else {
            ResponseFailure::AllVariantsFailed(
                failures
                    .into_iter()
                    .map(|(model, err)| format!("{}: {}", model.unwrap_or(name), err))
                    .collect(),
            )
        };
        tracing::warn!(provider = %name, error = %error, "Provider call failed");
        ResponseRecord::failure(name, error, latency_ms)
    }
}

impl ProviderAdapter for HttpAdapter {
    fn id(&self) -> &str {
        &self.config.name
    }

    fn invoke<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, ResponseRecord> {
        Box::pin(self.run(prompt))
    }
}
