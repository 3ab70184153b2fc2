//! Single JSON POST to a provider, classified into [`CallError`]s.

use reqwest::header::HeaderMap;
use reqwest::Client;

use super::retry::{call_with_retry, CallError, RetryPolicy};

/// Upstream error bodies are truncated to this many characters.
const ERROR_BODY_LIMIT: usize = 200;

/// A fully built provider request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Issue one POST and decode a JSON body on 2xx.
pub async fn post_json(
    client: &Client,
    request: &UpstreamRequest,
) -> Result<serde_json::Value, CallError> {
    let response = client
        .post(&request.url)
        .headers(request.headers.clone())
        .json(&request.body)
        .send()
        .await
        .map_err(|e| CallError::Transport(e.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(CallError::from_status(status.as_u16(), body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| CallError::Decode(e.without_url().to_string()))
}

/// [`post_json`] under the shared retry policy.
pub async fn send(
    client: &Client,
    policy: &RetryPolicy,
    target: &str,
    request: &UpstreamRequest,
) -> Result<serde_json::Value, CallError> {
    call_with_retry(policy, target, || post_json(client, request)).await
}
