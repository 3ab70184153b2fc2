//! chorus - multi-provider LLM routing with learned ensemble selection
//!
//! Serves the chat API, or runs single turns and feedback from the shell.

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorus::config::{Config, KeySource};
use chorus::orchestrator::{OrchestrateOptions, Orchestrator};
use chorus::storage::PerformanceStore;

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "Multi-provider LLM routing with learned ensemble selection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },

    /// Show providers, their capabilities and learned scores
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },

    /// Run one turn and print the outcome as JSON
    Ask {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Dispatch exactly these providers (repeatable)
        #[arg(short, long = "provider")]
        providers: Vec<String>,

        /// Take the first successful response instead of scoring
        #[arg(long)]
        no_ensemble: bool,

        prompt: String,
    },

    /// Rate a provider's answer from 1 to 5
    Feedback {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        provider: String,

        #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
    },
}

impl Commands {
    fn config_path(&self) -> &str {
        match self {
            Commands::Serve { config, .. }
            | Commands::Check { config }
            | Commands::Providers { config }
            | Commands::Ask { config, .. }
            | Commands::Feedback { config, .. } => config,
        }
    }
}

/// `[logging] level` from the config file, if it can be read.
fn configured_level(path: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: toml::Value = toml::from_str(&content).ok()?;
    value
        .get("logging")?
        .get("level")?
        .as_str()
        .map(String::from)
}

/// Load `path`, falling back to the built-in catalog when the default
/// config file does not exist.
fn load_config(path: &str) -> anyhow::Result<(Config, Vec<(String, KeySource)>)> {
    if path == DEFAULT_CONFIG && !Path::new(path).exists() {
        tracing::info!(config = %path, "No config file, using built-in providers");
        return Config::parse_str_with("", |name| std::env::var(name).ok())
            .context("built-in configuration is invalid");
    }
    Config::from_file_with_env(path).with_context(|| format!("failed to load {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = configured_level(cli.command.config_path()).unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chorus={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut config, _) = load_config(&config)?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            chorus::proxy::run_server(config).await
        }

        Commands::Check { config: path } => {
            let (config, key_sources) = load_config(&path)?;
            println!("Configuration OK: {}", path);
            println!("  listen:        {}", config.server.listen);
            println!("  max providers: {}", config.dispatch.max_providers);
            println!(
                "  retries:       {} attempts, {} ms timeout",
                config.dispatch.max_retries, config.dispatch.timeout_ms
            );
            println!("  performance:   {}", config.performance.path);
            println!("  categories:    {}", config.categories.len());
            for (name, source) in &key_sources {
                println!("  {:<12} key: {}", name, source);
            }
            Ok(())
        }

        Commands::Providers { config: path } => {
            let (config, key_sources) = load_config(&path)?;
            let known: Vec<String> = config.providers.iter().map(|p| p.name.clone()).collect();
            let store = PerformanceStore::load(
                &config.performance.path,
                &known,
                config.performance.flush,
            );

            println!(
                "{:<12} {:<17} {:>5} {:>6} {:>6}  {:<20} capabilities",
                "name", "kind", "conf", "score", "count", "key"
            );
            for provider in &config.providers {
                let record = store.get(&provider.name).unwrap_or_default();
                let source = key_sources
                    .iter()
                    .find(|(name, _)| name == &provider.name)
                    .map(|(_, source)| source.to_string())
                    .unwrap_or_else(|| KeySource::None.to_string());
                println!(
                    "{:<12} {:<17} {:>5.2} {:>6.3} {:>6}  {:<20} {}",
                    provider.name,
                    format!("{:?}", provider.kind),
                    provider.confidence,
                    record.score,
                    record.sample_count,
                    source,
                    provider.capabilities.join(", ")
                );
            }
            Ok(())
        }

        Commands::Ask {
            config: path,
            providers,
            no_ensemble,
            prompt,
        } => {
            let (config, _) = load_config(&path)?;
            let orchestrator = Orchestrator::from_config(&config).await?;

            let options = OrchestrateOptions {
                providers: (!providers.is_empty()).then_some(providers),
                use_ensemble: !no_ensemble,
            };
            let outcome = orchestrator.orchestrate_with(&prompt, options).await;

            // Periodic flushes may not have fired in a one-shot run
            orchestrator.store().persist_blocking().await;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        Commands::Feedback {
            config: path,
            provider,
            rating,
        } => {
            let (config, _) = load_config(&path)?;
            let orchestrator = Orchestrator::from_config(&config).await?;
            let record = orchestrator.record_feedback(&provider, rating).await?;
            println!(
                "{}: score {:.3} after {} samples",
                provider, record.score, record.sample_count
            );
            Ok(())
        }
    }
}
