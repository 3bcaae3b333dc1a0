//! Sigwatch - signal lifecycle monitor
//!
//! Admits candidate signals through the deduplicator, tracks open trades
//! against a live price feed, journals outcomes, and keeps a replay buffer
//! for regression checks. All periodic work runs through the job wrapper.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigwatch::cache::{CacheConfig, ExpiringCache};
use sigwatch::config::AppConfig;
use sigwatch::dedup::{DedupConfig, SignalDeduplicator};
use sigwatch::engine::SignalEngine;
use sigwatch::feeds::{HttpPriceFeed, LogNotifier, Notifier, PriceFeed};
use sigwatch::jobs::{JobRunner, JobStatsRegistry};
use sigwatch::journal::OutcomeJournal;
use sigwatch::persistence::FileKeyedStore;
use sigwatch::replay::{ReplayConfig, ReplayHarness};
use sigwatch::tracker::{ActiveTradeTracker, TrackerConfig};
use sigwatch::types::Timeframe;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sigwatch=info")),
        )
        .init();

    info!("🚀 Starting sigwatch v{}", env!("CARGO_PKG_VERSION"));

    // 1. Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    for tf in &config.bot.timeframes {
        Timeframe::from_str(tf)
            .with_context(|| format!("Unsupported timeframe '{}' in bot.timeframes", tf))?;
    }
    info!("⚙️  {}", config.digest());

    let data_dir = config.persistence.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir))?;

    // 2. Durable stores and journal
    let dedup_store = Arc::new(
        FileKeyedStore::new(Path::new(&data_dir).join("dedup"))
            .context("Failed to open dedup store")?,
    );
    let replay_store = Arc::new(
        FileKeyedStore::new(Path::new(&data_dir).join("replay"))
            .context("Failed to open replay store")?,
    );
    let journal = Arc::new(OutcomeJournal::new(&data_dir).context("Failed to open journal")?);
    info!("💾 Persistence ready at {}", data_dir);

    // 3. Feeds and notifications
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());
    let feed: Arc<dyn PriceFeed> = Arc::new(
        HttpPriceFeed::new(&config.feeds.price_url, config.feeds.request_timeout_ms)
            .context("Failed to build price feed")?,
    );
    let price_cache = Arc::new(ExpiringCache::<String, f64>::new(CacheConfig {
        max_size: config.cache.max_size,
        ttl_seconds: config.cache.ttl_seconds,
    }));

    // 4. Core components
    let dedup = Arc::new(SignalDeduplicator::new(
        DedupConfig {
            price_delta_threshold: config.dedup.price_delta_threshold,
            retention_hours: config.dedup.retention_hours,
        },
        dedup_store,
    ));
    let tracker = Arc::new(
        ActiveTradeTracker::new(
            TrackerConfig {
                alert_progress_pct: config.tracker.alert_progress_pct,
            },
            journal.clone(),
            notifier.clone(),
        )
        .with_state_file(Path::new(&data_dir).join("tracker").join("active_trades.json")),
    );
    let replay = Arc::new(
        ReplayHarness::new(ReplayConfig {
            capacity: config.replay.capacity,
            tolerance: config.replay.tolerance,
        })
        .with_store(replay_store),
    );

    // 5. Engine and periodic jobs
    let runner = JobRunner::new(notifier.clone(), Arc::new(JobStatsRegistry::new()));
    let engine = SignalEngine::new(
        dedup,
        tracker,
        replay,
        journal,
        notifier,
        feed,
        price_cache,
        runner,
    )
    .with_audit_log(&data_dir)
    .context("Failed to open signal audit log")?;

    let handles = engine.spawn_jobs(&config);
    info!(
        trades = engine.active_trades().len(),
        "✅ Monitoring started"
    );

    // 6. Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown signal received, stopping jobs");
    for handle in handles {
        handle.abort();
    }

    Ok(())
}
