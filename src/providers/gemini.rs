//! Google `generateContent` payloads.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ApiKey;
use crate::proxy::upstream::UpstreamRequest;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub(super) fn build_request(
    base_url: &str,
    mut headers: HeaderMap,
    key: &ApiKey,
    model: &str,
    prompt: &str,
) -> Result<UpstreamRequest, String> {
    let url = format!(
        "{}/{}:generateContent",
        base_url.trim_end_matches('/'),
        model
    );

    let mut value = HeaderValue::from_str(key.expose_secret())
        .map_err(|_| "API key is not a valid header value".to_string())?;
    value.set_sensitive(true);
    headers.insert(HeaderName::from_static(API_KEY_HEADER), value);

    let body = serde_json::json!({
        "contents": [{"parts": [{"text": prompt}]}]
    });

    Ok(UpstreamRequest { url, headers, body })
}

/// `candidates[0].content.parts[0].text`, or empty when the shape doesn't match.
pub(super) fn extract_content(payload: &serde_json::Value) -> String {
    payload
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_shape() {
        let key = ApiKey::from("g-key");
        let request = build_request(
            "https://generativelanguage.googleapis.com/v1/models",
            HeaderMap::new(),
            &key,
            "gemini-2.0-flash-exp",
            "hi",
        )
        .unwrap();

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1/models/gemini-2.0-flash-exp:generateContent"
        );
        assert_eq!(request.headers[API_KEY_HEADER], "g-key");
        assert_eq!(request.body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_extract_content() {
        let payload = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "bonjour"}]}}]
        });
        assert_eq!(extract_content(&payload), "bonjour");
        assert_eq!(extract_content(&serde_json::json!({"candidates": []})), "");
    }
}
