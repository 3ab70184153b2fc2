//! Configuration parsing and validation for chorus.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub dispatch: DispatchConfig,
    pub performance: PerformanceConfig,
    pub providers: Vec<ProviderConfig>,
    pub categories: Vec<CategoryConfig>,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Chat turns served at once; further requests wait
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_concurrent_turns() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_concurrent_turns: default_max_concurrent_turns(),
        }
    }
}

/// Database configuration for the per-turn response log.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./chorus.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Fan-out and resilience settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on providers queried per turn
    #[serde(default = "default_max_providers")]
    pub max_providers: usize,
    /// Total attempts per upstream call (not retries after the first)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base backoff; the n-th wait is `base * 2^n`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Providers tried when no provider has a credential
    #[serde(default = "default_fallback_providers")]
    pub fallback_providers: Vec<String>,
}

fn default_max_providers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_fallback_providers() -> Vec<String> {
    vec!["gemini".to_string(), "deepseek".to_string()]
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_providers: default_max_providers(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            fallback_providers: default_fallback_providers(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// When the performance store is flushed to disk after an ensemble update.
///
/// Explicit feedback always flushes regardless of this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush whenever the total sample count is a multiple of `n`.
    EverySamples { n: u64 },
    /// Flush after every update.
    Always,
    /// Never flush automatically.
    Never,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::EverySamples { n: 10 }
    }
}

impl FlushPolicy {
    /// Whether a store whose samples now total `total_samples` should be flushed.
    pub fn should_flush(&self, total_samples: u64) -> bool {
        match *self {
            FlushPolicy::EverySamples { n } => n > 0 && total_samples % n == 0,
            FlushPolicy::Always => true,
            FlushPolicy::Never => false,
        }
    }
}

/// Learned-performance persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    /// JSON file holding provider -> {score, count, last_updated}
    #[serde(default = "default_performance_path")]
    pub path: String,
    #[serde(default)]
    pub flush: FlushPolicy,
}

fn default_performance_path() -> String {
    "model_performance.json".to_string()
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            path: default_performance_path(),
            flush: FlushPolicy::default(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// True for a key that is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from a convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Wire format spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-style `POST {url}/chat/completions` (OpenRouter and friends)
    #[default]
    ChatCompletions,
    /// Google `POST {url}/{model}:generateContent`, keyed by `x-goog-api-key`
    Gemini,
}

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique name for this provider
    pub name: String,
    pub kind: ProviderKind,
    /// Base URL for the provider's API
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Model variants, tried in order until one succeeds
    pub models: Vec<String>,
    /// Capability tags matched against query categories
    pub capabilities: Vec<String>,
    /// Declared confidence attached to every response, in [0, 1]
    pub confidence: f64,
    pub max_tokens: u32,
    /// Extra static headers sent with every request
    pub headers: BTreeMap<String, String>,
}

/// A keyword category used by the query classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to log per-provider responses to the database
    #[serde(default = "default_true")]
    pub log_responses: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_responses: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProviderConfig {
    name: String,
    #[serde(default)]
    kind: ProviderKind,
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_confidence() -> f64 {
    0.5
}

fn default_max_tokens() -> u32 {
    2000
}

/// Raw configuration deserialized directly from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    performance: PerformanceConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    categories: Vec<CategoryConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1/models";

fn builtin_provider(
    name: &str,
    kind: ProviderKind,
    url: &str,
    models: &[&str],
    capabilities: &[&str],
    confidence: f64,
) -> RawProviderConfig {
    RawProviderConfig {
        name: name.to_string(),
        kind,
        url: url.to_string(),
        api_key: None,
        models: models.iter().map(|m| m.to_string()).collect(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        confidence,
        max_tokens: default_max_tokens(),
        headers: BTreeMap::new(),
    }
}

/// Provider catalog used when the config file declares no providers.
pub fn builtin_providers() -> Vec<RawProviderConfig> {
    use ProviderKind::{ChatCompletions, Gemini};
    vec![
        builtin_provider(
            "gemini",
            Gemini,
            GEMINI_URL,
            &["gemini-2.0-flash-exp"],
            &["general", "creative", "multilingual", "vision"],
            0.85,
        ),
        builtin_provider(
            "deepseek",
            ChatCompletions,
            OPENROUTER_URL,
            &["deepseek/deepseek-chat"],
            &["coding", "technical", "mathematical", "reasoning"],
            0.88,
        ),
        builtin_provider(
            "claude",
            ChatCompletions,
            OPENROUTER_URL,
            &["anthropic/claude-3.5-haiku"],
            &["writing", "analysis", "research", "ethical"],
            0.90,
        ),
        builtin_provider(
            "gpt",
            ChatCompletions,
            OPENROUTER_URL,
            &["openai/gpt-3.5-turbo"],
            &["general", "conversation", "summarization", "creative"],
            0.87,
        ),
        builtin_provider(
            "qwen",
            ChatCompletions,
            OPENROUTER_URL,
            &["qwen/qwen2.5-7b-instruct:free", "qwen/qwen-2.5-72b-instruct"],
            &["multilingual", "chinese", "reasoning", "coding"],
            0.86,
        ),
        builtin_provider(
            "perplx",
            ChatCompletions,
            OPENROUTER_URL,
            &["perplexity/llama-3.1-sonar-small-128k-online"],
            &["research", "factual", "current_events", "citations"],
            0.89,
        ),
    ]
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: &F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Convention env var names for a provider, in lookup order.
///
/// - "claude" -> ["CHORUS_CLAUDE_API_KEY", "CLAUDE_KEY"]
/// - "open-router" -> ["CHORUS_OPEN_ROUTER_API_KEY", "OPEN_ROUTER_KEY"]
pub fn convention_env_var_names(provider_name: &str) -> [String; 2] {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    [
        format!("CHORUS_{}_API_KEY", upper_snake),
        format!("{}_KEY", upper_snake),
    ]
}

fn convention_key_lookup<F>(provider_name: &str, lookup: &F) -> Option<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    convention_env_var_names(provider_name)
        .into_iter()
        .find_map(|var| lookup(&var).filter(|v| !v.is_empty()).map(|v| (var, v)))
}

impl Config {
    /// Load configuration from a TOML file, expanding keys from the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_env(path).map(|(config, _)| config)
    }

    /// Parse configuration from a TOML string, expanding keys from the process environment.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok()).map(|(config, _)| config)
    }

    /// Parse configuration with a custom environment lookup.
    ///
    /// The closure keeps tests independent of global env state.
    pub fn parse_str_with<F>(
        content: &str,
        lookup: F,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw_with(raw, &lookup)?;
        config.validate()?;
        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str_with(&content, |name| std::env::var(name).ok())
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - If `api_key` contains `${VAR}`: expand, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try convention lookup, source = `Convention(var)` or `None`
    ///
    /// A key that is blank, literally or after expansion, counts as absent.
    ///
    /// An empty provider list is replaced by [`builtin_providers`], and an empty
    /// category list by [`crate::router::default_categories`].
    pub fn from_raw_with<F>(
        raw: RawConfig,
        lookup: &F,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_providers = if raw.providers.is_empty() {
            builtin_providers()
        } else {
            raw.providers
        };

        let mut providers = Vec::with_capacity(raw_providers.len());
        let mut key_sources = Vec::with_capacity(raw_providers.len());

        for rp in raw_providers {
            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars_with(raw_key, &rp.name, lookup)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name, lookup) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            let (api_key, source) = match api_key {
                Some(key) if key.is_blank() => {
                    tracing::warn!(
                        provider = %rp.name,
                        "API key is empty, treating provider as keyless"
                    );
                    (None, KeySource::None)
                }
                other => (other, source),
            };

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                kind: rp.kind,
                url: rp.url,
                api_key,
                models: rp.models,
                capabilities: rp.capabilities,
                confidence: rp.confidence,
                max_tokens: rp.max_tokens,
                headers: rp.headers,
            });
        }

        let categories = if raw.categories.is_empty() {
            crate::router::default_categories()
        } else {
            raw.categories
        };

        let config = Config {
            server: raw.server,
            database: raw.database,
            dispatch: raw.dispatch,
            performance: raw.performance,
            providers,
            categories,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
            if !(0.0..=1.0).contains(&provider.confidence) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' confidence {} is outside [0, 1]",
                    provider.name, provider.confidence
                )));
            }
            if provider.kind == ProviderKind::Gemini && provider.models.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' needs at least one model for the gemini API",
                    provider.name
                )));
            }
        }

        if self.dispatch.max_retries == 0 {
            return Err(ConfigError::Validation(
                "dispatch.max_retries must be at least 1".to_string(),
            ));
        }

        if self.dispatch.max_providers == 0 {
            tracing::warn!("dispatch.max_providers is 0, using 1");
        }

        if !self.providers.iter().any(|p| p.api_key.is_some()) {
            tracing::warn!("No provider has an API key - every turn will fail");
        }

        Ok(())
    }

}
