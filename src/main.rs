//! tiered-cache: maintenance CLI for a cache directory.
//!
//! Opens the cache described by the configuration file and runs a single
//! operation against it. Only L3 persists between invocations; the memory
//! tiers start empty every run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tiered_cache::config::{Cli, Command, Config};
use tiered_cache::{JsonSerializer, MultiTierCache, PrometheusExporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tiered_cache=debug"
    } else {
        "tiered_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("tiered-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        l1_max_entries = config.l1.max_entries,
        l2_max_entries = config.l2.max_entries,
        l3_max_size = config.l3.max_size,
        cache_dir = %config.l3.cache_dir.display(),
        "Configuration loaded"
    );

    let cache = MultiTierCache::<serde_json::Value>::open(config, Arc::new(JsonSerializer::new()))
        .await
        .context("failed to open cache")?;

    let outcome = run(&cache, cli.command).await;
    cache.close().await?;
    outcome
}

async fn run(cache: &MultiTierCache<serde_json::Value>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key } => match cache.lookup(&key).await {
            Some(hit) => {
                info!(key = %key, tier = %hit.tier, "Found");
                println!("{}", serde_json::to_string_pretty(&hit.value)?);
            }
            None => anyhow::bail!("key not found: {key}"),
        },
        Command::Set { key, value, ttl_ms } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value must be a JSON document")?;
            let ttl = ttl_ms.map(Duration::from_millis);
            if !cache.set(&key, value, ttl).await {
                anyhow::bail!("no tier accepted the value for {key}");
            }
            println!("stored {key}");
        }
        Command::Delete { key } => {
            cache.delete(&key).await;
            println!("deleted {key}");
        }
        Command::Stats { prometheus } => {
            let metrics = cache.metrics().await;
            if prometheus {
                let exporter = PrometheusExporter::new()?;
                exporter.update(&metrics);
                print!("{}", exporter.render()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            }
        }
        Command::Optimize => {
            let report = cache.optimize().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
