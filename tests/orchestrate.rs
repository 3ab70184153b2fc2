//! End-to-end turns through `Orchestrator::from_config`.
//!
//! Providers are wiremock servers, the performance file and response log
//! live in a temp dir. Covers routing, ensemble choice, learning and
//! persistence across a restart.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use chorus::config::Config;
use chorus::orchestrator::{OrchestrateOptions, Orchestrator};
use chorus::storage::stats::query_provider_stats;
use chorus::storage::PerformanceStore;

const POEM_PROMPT: &str = "write a short poem about the sea";

fn completion(content: &str) -> serde_json::Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

fn sea_poem() -> String {
    "A short poem about the sea: write of waves that roll and break, of tide and salt and gull. "
        .repeat(8)
}

async fn provider_answering(content: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(content))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

async fn provider_failing(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// Config with three providers; `extra` is appended verbatim.
fn config_toml(dir: &TempDir, poet: &str, terse: &str, broken: &str, extra: &str) -> String {
    format!(
        r#"
[dispatch]
max_providers = 3
max_retries = 2
timeout_ms = 5000
backoff_base_ms = 5

[performance]
path = "{perf}"
flush = {{ mode = "always" }}

[[providers]]
name = "poet"
url = "{poet}"
api_key = "k1"
models = ["poet-large"]
capabilities = ["creative", "writing"]
confidence = 0.9

[[providers]]
name = "terse"
url = "{terse}"
api_key = "k2"
models = ["terse-small"]
capabilities = ["general"]
confidence = 0.5

[[providers]]
name = "broken"
url = "{broken}"
api_key = "k3"
capabilities = ["creative"]
confidence = 0.99
{extra}
"#,
        perf = dir.path().join("performance.json").display(),
        poet = poet,
        terse = terse,
        broken = broken,
        extra = extra,
    )
}

#[tokio::test]
async fn test_best_answer_wins_and_is_learned() {
    let dir = TempDir::new().unwrap();
    let poet = provider_answering(&sea_poem(), Duration::from_millis(0)).await;
    let terse = provider_answering("ok", Duration::from_millis(0)).await;
    let broken = provider_failing(500).await;

    let config = Config::parse_str(&config_toml(&dir, &poet.uri(), &terse.uri(), &broken.uri(), ""))
        .unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let outcome = orchestrator.orchestrate(POEM_PROMPT, None).await;

    assert_eq!(outcome.responses.len(), 3);
    assert!(outcome.responses["broken"].error.is_some());
    assert_eq!(outcome.decision.winner_id(), "poet");
    assert!(outcome.decision.all_scores["poet"] > outcome.decision.all_scores["terse"]);
    assert!(!outcome.decision.all_scores.contains_key("broken"));

    // broken is retried to exhaustion: two attempts
    assert_eq!(broken.received_requests().await.unwrap().len(), 2);

    let snapshot = orchestrator.performance_snapshot();
    assert_eq!(snapshot["poet"].sample_count, 1);
    assert_eq!(snapshot["terse"].sample_count, 0);
    assert!(snapshot["poet"].score > 0.5);

    // Flush policy "always" wrote the file; a fresh load sees the same record
    let reloaded = PerformanceStore::load(
        dir.path().join("performance.json"),
        &[],
        config.performance.flush,
    );
    assert_eq!(reloaded.get("poet"), Some(snapshot["poet"].clone()));
}

#[tokio::test]
async fn test_every_provider_failing_yields_sentinel() {
    let dir = TempDir::new().unwrap();
    let a = provider_failing(401).await;
    let b = provider_failing(400).await;
    let c = provider_failing(503).await;

    let config =
        Config::parse_str(&config_toml(&dir, &a.uri(), &b.uri(), &c.uri(), "")).unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let outcome = orchestrator.orchestrate(POEM_PROMPT, None).await;

    assert!(outcome.decision.is_no_valid_responses());
    assert_eq!(outcome.decision.winner_id(), "none");
    assert_eq!(orchestrator.store().total_samples(), 0);
    assert!(!dir.path().join("performance.json").exists());
}

#[tokio::test]
async fn test_explicit_providers_and_no_ensemble() {
    let dir = TempDir::new().unwrap();
    let poet = provider_answering(&sea_poem(), Duration::from_millis(300)).await;
    let terse = provider_answering("a quick but valid reply", Duration::from_millis(0)).await;
    let broken = provider_failing(500).await;

    let config = Config::parse_str(&config_toml(&dir, &poet.uri(), &terse.uri(), &broken.uri(), ""))
        .unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let outcome = orchestrator
        .orchestrate_with(
            POEM_PROMPT,
            OrchestrateOptions {
                providers: Some(vec!["terse".into(), "poet".into(), "nobody".into()]),
                use_ensemble: false,
            },
        )
        .await;

    assert_eq!(outcome.responses.len(), 2);
    assert!(broken.received_requests().await.unwrap().is_empty());
    assert_eq!(outcome.decision.winner_id(), "terse");
    assert!(outcome.decision.all_scores.is_empty());
    assert_eq!(orchestrator.store().total_samples(), 0);
}

#[tokio::test]
async fn test_feedback_persists_immediately() {
    let dir = TempDir::new().unwrap();
    let poet = provider_answering("unused", Duration::from_millis(0)).await;
    // Automatic flushes never fire, so only feedback can write the file
    let toml = config_toml(&dir, &poet.uri(), &poet.uri(), &poet.uri(), "")
        .replace(r#"flush = { mode = "always" }"#, r#"flush = { mode = "never" }"#);
    let config = Config::parse_str(&toml).unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let record = orchestrator.record_feedback("poet", 5).await.unwrap();
    assert!((record.score - 0.65).abs() < 1e-12);
    assert_eq!(record.sample_count, 1);

    let reloaded =
        PerformanceStore::load(dir.path().join("performance.json"), &[], config.performance.flush);
    let persisted = reloaded.get("poet").unwrap();
    assert!((persisted.score - 0.65).abs() < 1e-12);
    assert_eq!(persisted.sample_count, 1);
}

#[tokio::test]
async fn test_response_log_feeds_provider_stats() {
    let dir = TempDir::new().unwrap();
    let poet = provider_answering(&sea_poem(), Duration::from_millis(0)).await;
    let terse = provider_answering("ok", Duration::from_millis(0)).await;
    let broken = provider_failing(401).await;

    let extra = format!(
        "\n[database]\npath = \"{}\"\n",
        dir.path().join("chorus.db").display()
    );
    let config = Config::parse_str(&config_toml(
        &dir,
        &poet.uri(),
        &terse.uri(),
        &broken.uri(),
        &extra,
    ))
    .unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();
    let pool = orchestrator.db().cloned().expect("database configured");

    orchestrator.orchestrate(POEM_PROMPT, None).await;
    orchestrator.orchestrate(POEM_PROMPT, None).await;

    // Log writes are fire-and-forget; poll until both turns have landed
    let mut rows = Vec::new();
    for _ in 0..50 {
        rows = query_provider_stats(&pool, None).await.unwrap();
        if rows.iter().map(|r| r.usage_count).sum::<i64>() == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let poet_row = rows.iter().find(|r| r.provider == "poet").unwrap();
    assert_eq!(poet_row.usage_count, 2);
    assert_eq!(poet_row.selected_count, 2);
    assert_eq!(poet_row.selection_rate(), 100.0);
    assert!((poet_row.avg_confidence - 0.9).abs() < 1e-9);

    let broken_row = rows.iter().find(|r| r.provider == "broken").unwrap();
    assert_eq!(broken_row.success_count, 0);
    assert_eq!(broken_row.selected_count, 0);
}
