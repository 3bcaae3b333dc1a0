//! Configuration management for sigwatch
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub tracker: TrackerConfig,
    pub jobs: JobsConfig,
    pub replay: ReplayConfig,
    pub persistence: PersistenceConfig,
    pub feeds: FeedsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging and CSV
    pub tag: String,
    /// Symbols to monitor
    pub symbols: Vec<String>,
    /// Timeframes to watch (15m, 1h, 4h, 1d)
    pub timeframes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entry-count capacity per cache instance
    pub max_size: usize,
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
    /// Proactive expiry sweep interval in seconds
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Relative entry-price difference treated as a materially new signal
    /// (e.g. 0.015 = 1.5%, inclusive)
    pub price_delta_threshold: f64,
    /// Retention window in hours for records with no duplicate checks
    pub retention_hours: i64,
    /// Retention sweep interval in seconds
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Poll interval for open trades in seconds
    pub poll_interval_secs: u64,
    /// Progress threshold (fraction of entry-to-target distance) for the
    /// one-time take-profit alert
    pub alert_progress_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Maximum retries per job invocation
    pub max_retries: u32,
    /// Fixed delay between retries in seconds
    pub retry_delay_secs: u64,
    /// Daily statistics report interval in seconds
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Snapshot buffer capacity (oldest evicted first)
    pub capacity: usize,
    /// Relative tolerance for numeric field comparison (0.0001 = 0.01%)
    pub tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    /// Price feed base URL
    pub price_url: String,
    /// Timeout for external calls in milliseconds
    pub request_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.symbols", vec!["BTC", "ETH", "SOL"])?
            .set_default("bot.timeframes", vec!["1h", "4h"])?
            // Cache defaults
            .set_default("cache.max_size", 256)?
            .set_default("cache.ttl_seconds", 300)?
            .set_default("cache.cleanup_interval_secs", 60)?
            // Dedup defaults
            .set_default("dedup.price_delta_threshold", 0.015)?
            .set_default("dedup.retention_hours", 168)?
            .set_default("dedup.sweep_interval_secs", 3600)?
            // Tracker defaults
            .set_default("tracker.poll_interval_secs", 60)?
            .set_default("tracker.alert_progress_pct", 0.80)?
            // Jobs defaults
            .set_default("jobs.max_retries", 3)?
            .set_default("jobs.retry_delay_secs", 5)?
            .set_default("jobs.report_interval_secs", 86400)?
            // Replay defaults
            .set_default("replay.capacity", 10)?
            .set_default("replay.tolerance", 0.0001)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            // Feeds defaults
            .set_default("feeds.price_url", "https://api.binance.com/api/v3/ticker/price")?
            .set_default("feeds.request_timeout_ms", 5000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SIGWATCH_*)
            .add_source(Environment::with_prefix("SIGWATCH").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for startup logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} symbols={:?} timeframes={:?} poll={}s dedup_threshold={:.3} retention={}h",
            self.bot.tag,
            self.bot.symbols,
            self.bot.timeframes,
            self.tracker.poll_interval_secs,
            self.dedup.price_delta_threshold,
            self.dedup.retention_hours
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
