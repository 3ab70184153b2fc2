//! OpenAI-compatible `/chat/completions` payloads (OpenRouter and similar).

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::config::ApiKey;
use crate::proxy::upstream::UpstreamRequest;

/// Chat completion request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A chat message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletionRequest {
    /// A single-turn request carrying `prompt` as the user message.
    pub fn user_prompt(model: Option<&str>, prompt: &str, max_tokens: u32) -> Self {
        Self {
            model: model.map(String::from),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: Some(max_tokens),
        }
    }
}

pub(super) fn build_request(
    base_url: &str,
    mut headers: HeaderMap,
    key: &ApiKey,
    model: Option<&str>,
    prompt: &str,
    max_tokens: u32,
) -> Result<UpstreamRequest, String> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
        .map_err(|_| "API key is not a valid header value".to_string())?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let body = serde_json::to_value(ChatCompletionRequest::user_prompt(model, prompt, max_tokens))
        .map_err(|e| e.to_string())?;

    Ok(UpstreamRequest { url, headers, body })
}

/// `choices[0].message.content`, or empty when the shape doesn't match.
pub(super) fn extract_content(payload: &serde_json::Value) -> String {
    payload
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
