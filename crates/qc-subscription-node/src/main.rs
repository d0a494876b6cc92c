//! # Block Subscription Node
//!
//! Runs the block subscription server against an in-memory development chain
//! that produces a block on a fixed interval.
//!
//! ## Environment
//!
//! Server settings come from `SubscriptionConfig::from_env()`
//! (`QC_SUBSCRIPTION_*`). The development chain reads:
//!
//! - `QC_DEV_BLOCK_INTERVAL_MS`: block production interval (default: 500)
//! - `QC_DEV_IRREVERSIBLE_LAG`: blocks between head and irreversible (default: 12)
//! - `QC_DEV_PREFILL_BLOCKS`: blocks produced before the server starts (default: 0)
//! - `QC_DEV_PRODUCER`: producer name stamped on blocks (default: eosio)
//!
//! Logging: `RUST_LOG`, else `QC_LOG_LEVEL`, else `info`. `QC_JSON_LOGS=1`
//! switches to JSON output.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use qc_18_block_subscription::{
    AcceptedBlockFeed, BlockSubscriptionApi, BlockSubscriptionService, InMemoryChain,
    JsonBlockEncoder, SubscriptionConfig, VERSION,
};

/// Development chain settings
#[derive(Debug, Clone)]
struct DevChainConfig {
    block_interval: Duration,
    irreversible_lag: u64,
    prefill_blocks: u64,
    producer: String,
}

impl DevChainConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            block_interval: Duration::from_millis(env_or("QC_DEV_BLOCK_INTERVAL_MS", 500)?),
            irreversible_lag: env_or("QC_DEV_IRREVERSIBLE_LAG", 12)?,
            prefill_blocks: env_or("QC_DEV_PREFILL_BLOCKS", 0)?,
            producer: env_or("QC_DEV_PRODUCER", "eosio".to_string())?,
        })
    }
}

fn env_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {var}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("QC_LOG_LEVEL").unwrap_or_else(|_| "info".into());
            EnvFilter::try_new(level)
        })
        .context("Invalid log filter")?;

    let json = std::env::var("QC_JSON_LOGS")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!(e))
    .context("Failed to install tracing subscriber")
}

/// Produce one block per interval until shutdown.
async fn run_producer(
    chain: Arc<InMemoryChain>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let block = chain.produce_next();
                debug!(height = block.height, id = %block.id_hex(), "Block produced");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = SubscriptionConfig::from_env().context("Failed to load subscription config")?;
    let dev = DevChainConfig::from_env()?;

    info!("===========================================");
    info!("  Quantum-Chain Block Subscription v{VERSION}");
    info!("===========================================");

    let chain = Arc::new(
        InMemoryChain::new()
            .with_irreversible_lag(dev.irreversible_lag)
            .with_producer(dev.producer.clone()),
    );
    chain.extend_to(dev.prefill_blocks);

    let service = Arc::new(
        BlockSubscriptionService::new(config, chain.clone(), Arc::new(JsonBlockEncoder::new()))
            .context("Failed to create block subscription service")?,
    );
    let addr = service.start().context("Failed to start block subscription service")?;

    let feed = AcceptedBlockFeed::new(chain.subscribe_accepted(), chain.clone(), service.clone());
    let feed_task = tokio::spawn(feed.run(service.shutdown_signal()));
    let producer_task = tokio::spawn(run_producer(
        chain.clone(),
        dev.block_interval,
        service.shutdown_signal(),
    ));

    info!(
        addr = %addr,
        block_interval = ?dev.block_interval,
        irreversible_lag = dev.irreversible_lag,
        "Node is running. Press Ctrl+C to stop."
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    // Graceful shutdown
    service.shutdown();
    service.stopped().await;
    let _ = producer_task.await;
    let _ = feed_task.await;

    info!(stats = ?service.stats(), "Shutdown complete");
    Ok(())
}
