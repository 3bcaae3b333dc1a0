//! Signal engine - control-flow wiring and operator surface
//!
//! A candidate signal flows: validate → deduplicate → register with the
//! tracker → capture a replay snapshot → notify the user. Every admission
//! decision (including suppressions) is appended to the signal audit CSV.
//!
//! All periodic work - trade polling, cache cleanup, dedup retention, the
//! statistics report - is scheduled exclusively through the job wrapper.

use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheStats, ExpiringCache};
use crate::config::AppConfig;
use crate::dedup::{Decision, SignalDeduplicator};
use crate::error::Result;
use crate::feeds::{Audience, Notifier, PriceFeed, SignalGenerator};
use crate::jobs::{JobCounters, JobRunner, JobTask, RetryPolicy};
use crate::journal::{JournalRecord, OutcomeJournal, Statistics};
use crate::replay::{ReplayHarness, ReplayReport};
use crate::tracker::{validate_signal, ActiveTradeTracker, TradeSnapshot};
use crate::types::{Signal, SignalContext};

/// One row per admission decision, for offline analysis
#[derive(Debug, Clone, Serialize)]
struct SignalAuditRecord {
    timestamp: i64,
    signal_id: String,
    symbol: String,
    timeframe: String,
    direction: String,
    entry_price: f64,
    stop_loss: f64,
    confidence: f64,
    strategy_id: String,
    decision: String,
}

/// Append-only audit log of admission decisions
struct SignalAuditLog {
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl SignalAuditLog {
    fn new(data_dir: &str) -> AnyResult<Self> {
        let dir = Path::new(data_dir).join("signals");
        fs::create_dir_all(&dir).context("Failed to create signals directory")?;
        let path = dir.join("admissions.csv");

        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open signal audit file")?;
        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    fn append(&self, signal: &Signal, decision: Decision) {
        let record = SignalAuditRecord {
            timestamp: Utc::now().timestamp_millis(),
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe.to_string(),
            direction: signal.direction.to_string(),
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            confidence: signal.confidence,
            strategy_id: signal.strategy_id.clone(),
            decision: decision.to_string(),
        };
        let mut writer = self.writer.lock().expect("audit lock poisoned");
        // Audit is best-effort; a failed row never blocks admission
        let ok = writer.serialize(&record).is_ok() && writer.flush().is_ok();
        if !ok {
            debug!(signal_id = %record.signal_id, "signal audit row dropped");
        }
    }
}

/// Top-level engine owning the core components
pub struct SignalEngine {
    dedup: Arc<SignalDeduplicator>,
    tracker: Arc<ActiveTradeTracker>,
    replay: Arc<ReplayHarness>,
    journal: Arc<OutcomeJournal>,
    notifier: Arc<dyn Notifier>,
    feed: Arc<dyn PriceFeed>,
    price_cache: Arc<ExpiringCache<String, f64>>,
    runner: JobRunner,
    audit: Option<SignalAuditLog>,
}

impl SignalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dedup: Arc<SignalDeduplicator>,
        tracker: Arc<ActiveTradeTracker>,
        replay: Arc<ReplayHarness>,
        journal: Arc<OutcomeJournal>,
        notifier: Arc<dyn Notifier>,
        feed: Arc<dyn PriceFeed>,
        price_cache: Arc<ExpiringCache<String, f64>>,
        runner: JobRunner,
    ) -> Self {
        Self {
            dedup,
            tracker,
            replay,
            journal,
            notifier,
            feed,
            price_cache,
            runner,
            audit: None,
        }
    }

    /// Enable the per-decision signal audit CSV under the data directory
    pub fn with_audit_log(mut self, data_dir: &str) -> AnyResult<Self> {
        self.audit = Some(SignalAuditLog::new(data_dir)?);
        Ok(self)
    }

    /// Run one candidate signal through the admission pipeline.
    ///
    /// Returns the dedup decision; on admission the trade is tracked and a
    /// replay snapshot captured before the user is notified.
    pub async fn handle_candidate(
        &self,
        signal: &Signal,
        context: &SignalContext,
    ) -> Result<Decision> {
        // A malformed candidate must not consume its fingerprint: the dedup
        // record is only written for signals that could actually be tracked
        validate_signal(signal)?;

        let fingerprint = signal.fingerprint();
        let decision =
            self.dedup
                .should_admit(&fingerprint, signal.entry_price, signal.confidence)?;

        if let Some(audit) = &self.audit {
            audit.append(signal, decision);
        }

        match decision {
            Decision::Suppress => {
                debug!(fingerprint = %fingerprint, "signal suppressed as near-duplicate");
            }
            Decision::AdmitFirst | Decision::AdmitNew => {
                self.tracker.register(signal)?;
                self.replay.capture(context.clone(), signal.clone());
                self.notifier
                    .notify(
                        Audience::User,
                        &format!(
                            "📢 {} {} {} | entry {:.4} stop {:.4} target {:.4} ({:.0}% confidence)",
                            signal.symbol,
                            signal.direction,
                            signal.timeframe,
                            signal.entry_price,
                            signal.stop_loss,
                            signal.take_profits[0],
                            signal.confidence * 100.0
                        ),
                    )
                    .await;
            }
        }
        Ok(decision)
    }

    // ── Operator surface ──

    /// Force-close a tracked trade at the given price
    pub async fn close_trade(&self, symbol: &str, target_price: f64) -> Result<JournalRecord> {
        self.tracker.close_manually(symbol, target_price).await
    }

    /// Ordered snapshots of currently tracked trades with progress
    pub fn active_trades(&self) -> Vec<TradeSnapshot> {
        self.tracker.list_active()
    }

    /// Replay all captured snapshots against the given generation logic
    pub async fn replay_report(&self, generator: &dyn SignalGenerator) -> ReplayReport {
        self.replay.replay_all(generator).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.price_cache.stats()
    }

    pub fn job_stats(&self) -> HashMap<String, JobCounters> {
        self.runner.stats().all()
    }

    pub fn statistics(&self) -> Result<Statistics> {
        self.journal.recompute_statistics()
    }

    /// Spawn every periodic task through the job wrapper. The returned
    /// handles run until aborted; none of them can crash the scheduler.
    pub fn spawn_jobs(&self, config: &AppConfig) -> Vec<JoinHandle<()>> {
        let retry_delay = Duration::from_secs(config.jobs.retry_delay_secs);
        let max_retries = config.jobs.max_retries;
        let policy =
            |name: &str| RetryPolicy::new(name, max_retries, retry_delay);

        let mut handles = Vec::new();

        // Trade polling
        let tracker = self.tracker.clone();
        let feed = self.feed.clone();
        let poll_task: JobTask = Arc::new(move || {
            let tracker = tracker.clone();
            let feed = feed.clone();
            Box::pin(async move {
                tracker.poll(feed.as_ref()).await;
                Ok(())
            })
        });
        handles.push(self.runner.spawn_periodic(
            Duration::from_secs(config.tracker.poll_interval_secs),
            policy("trade_poll"),
            poll_task,
        ));

        // Cache cleanup sweep
        let cache = self.price_cache.clone();
        let cleanup_task: JobTask = Arc::new(move || {
            let cache = cache.clone();
            Box::pin(async move {
                cache.cleanup_expired();
                Ok(())
            })
        });
        handles.push(self.runner.spawn_periodic(
            Duration::from_secs(config.cache.cleanup_interval_secs),
            policy("cache_cleanup"),
            cleanup_task,
        ));

        // Dedup retention sweep
        let dedup = self.dedup.clone();
        let sweep_task: JobTask = Arc::new(move || {
            let dedup = dedup.clone();
            Box::pin(async move {
                dedup.prune_stale()?;
                Ok(())
            })
        });
        handles.push(self.runner.spawn_periodic(
            Duration::from_secs(config.dedup.sweep_interval_secs),
            policy("dedup_sweep"),
            sweep_task,
        ));

        // Statistics report
        let journal = self.journal.clone();
        let notifier = self.notifier.clone();
        let report_task: JobTask = Arc::new(move || {
            let journal = journal.clone();
            let notifier = notifier.clone();
            Box::pin(async move {
                let stats = journal.recompute_statistics()?;
                info!("📊 {}", stats.summary());
                notifier.notify(Audience::User, &stats.summary()).await;
                Ok(())
            })
        });
        handles.push(self.runner.spawn_periodic(
            Duration::from_secs(config.jobs.report_interval_secs),
            policy("stats_report"),
            report_task,
        ));

        info!(jobs = handles.len(), "⏱️  periodic jobs scheduled");
        handles
    }
}
