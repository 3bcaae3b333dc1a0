//! Replay/Regression Harness
//!
//! Keeps a bounded chronological buffer of (input context, produced signal)
//! snapshots. Before a deploy, `replay_all` re-runs the current generation
//! logic against each stored context and diffs the result field by field -
//! unintended behavioral drift shows up as a REGRESSION with the differing
//! fields named. Strictly read-only with respect to live trading state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::error::Result;
use crate::feeds::SignalGenerator;
use crate::persistence::KeyedStore;
use crate::types::{Signal, SignalContext};

/// Store key for the persisted snapshot buffer
const SNAPSHOT_KEY: &str = "replay_snapshots";

/// Harness configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// FIFO buffer capacity; insertion at capacity evicts the oldest
    pub capacity: usize,
    /// Relative tolerance for numeric comparison (0.0001 = 0.01%)
    pub tolerance: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            tolerance: 0.0001,
        }
    }
}

/// One captured generation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    /// Short hash of the serialized context, used as the snapshot id
    pub context_hash: String,
    pub context: SignalContext,
    pub signal: Signal,
    pub captured_at_ms: i64,
}

/// Classification of one replayed snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Fresh signal matches the captured one within tolerance
    Match,
    /// Fresh signal differs; lists the differing fields
    Regression(Vec<String>),
    /// Replay itself failed
    Error(String),
}

impl std::fmt::Display for ReplayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayOutcome::Match => write!(f, "MATCH"),
            ReplayOutcome::Regression(fields) => write!(f, "REGRESSION({})", fields.join(",")),
            ReplayOutcome::Error(e) => write!(f, "ERROR({})", e),
        }
    }
}

/// Per-snapshot replay result
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub snapshot_id: String,
    pub symbol: String,
    pub captured_at_ms: i64,
    pub outcome: ReplayOutcome,
}

/// Aggregate report over the whole buffer. An empty buffer produces an
/// empty report, not an error.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub results: Vec<ReplayResult>,
    pub matches: usize,
    pub regressions: usize,
    pub errors: usize,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.regressions == 0 && self.errors == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "replayed={} matches={} regressions={} errors={}",
            self.results.len(),
            self.matches,
            self.regressions,
            self.errors
        )
    }
}

/// Bounded FIFO snapshot buffer with replay
pub struct ReplayHarness {
    config: ReplayConfig,
    snapshots: RwLock<VecDeque<ReplaySnapshot>>,
    /// Optional durable backing so the buffer survives a restart
    store: Option<Arc<dyn KeyedStore>>,
}

impl ReplayHarness {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            snapshots: RwLock::new(VecDeque::new()),
            store: None,
        }
    }

    /// Attach a durable store; loads any previously persisted buffer.
    pub fn with_store(mut self, store: Arc<dyn KeyedStore>) -> Self {
        match store.read(SNAPSHOT_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice::<VecDeque<ReplaySnapshot>>(&bytes) {
                Ok(saved) => {
                    info!(snapshots = saved.len(), "restored replay snapshots");
                    *self.snapshots.write().expect("replay lock poisoned") = saved;
                }
                Err(e) => warn!(error = %e, "ignoring corrupt replay snapshot buffer"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read replay snapshot buffer"),
        }
        self.store = Some(store);
        self
    }

    /// Capture a snapshot, evicting the oldest if the buffer is full
    pub fn capture(&self, context: SignalContext, signal: Signal) {
        let snapshot = ReplaySnapshot {
            context_hash: context_hash(&context),
            context,
            signal,
            captured_at_ms: Utc::now().timestamp_millis(),
        };

        {
            let mut snapshots = self.snapshots.write().expect("replay lock poisoned");
            if snapshots.len() >= self.config.capacity {
                snapshots.pop_front();
            }
            snapshots.push_back(snapshot);
        }
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().expect("replay lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-derive every snapshot against the current generation logic and
    /// diff the results. Does not mutate the buffer or any live state.
    pub async fn replay_all(&self, generator: &dyn SignalGenerator) -> ReplayReport {
        let snapshots: Vec<ReplaySnapshot> = {
            let guard = self.snapshots.read().expect("replay lock poisoned");
            guard.iter().cloned().collect()
        };

        let mut report = ReplayReport::default();
        for snapshot in snapshots {
            let outcome = match generator.generate_signal(&snapshot.context).await {
                Ok(Some(fresh)) => self.compare(&snapshot.signal, &fresh),
                Ok(None) => {
                    ReplayOutcome::Regression(vec!["signal no longer produced".to_string()])
                }
                Err(e) => ReplayOutcome::Error(e.to_string()),
            };

            match &outcome {
                ReplayOutcome::Match => report.matches += 1,
                ReplayOutcome::Regression(fields) => {
                    warn!(
                        snapshot = %snapshot.context_hash,
                        symbol = %snapshot.context.symbol,
                        fields = ?fields,
                        "replay detected signal drift"
                    );
                    report.regressions += 1;
                }
                ReplayOutcome::Error(e) => {
                    warn!(snapshot = %snapshot.context_hash, error = %e, "replay failed");
                    report.errors += 1;
                }
            }

            report.results.push(ReplayResult {
                snapshot_id: snapshot.context_hash,
                symbol: snapshot.context.symbol,
                captured_at_ms: snapshot.captured_at_ms,
                outcome,
            });
        }

        info!("🔁 {}", report.summary());
        report
    }

    /// Field-by-field comparison. Direction is exact; numeric fields use the
    /// configured relative tolerance to absorb floating-point noise.
    fn compare(&self, captured: &Signal, fresh: &Signal) -> ReplayOutcome {
        let mut diffs = Vec::new();

        if captured.direction != fresh.direction {
            diffs.push("direction".to_string());
        }
        if !rel_close(captured.entry_price, fresh.entry_price, self.config.tolerance) {
            diffs.push("entry_price".to_string());
        }
        if !rel_close(captured.stop_loss, fresh.stop_loss, self.config.tolerance) {
            diffs.push("stop_loss".to_string());
        }
        if captured.take_profits.len() != fresh.take_profits.len() {
            diffs.push("take_profits.len".to_string());
        } else {
            for (i, (a, b)) in captured
                .take_profits
                .iter()
                .zip(fresh.take_profits.iter())
                .enumerate()
            {
                if !rel_close(*a, *b, self.config.tolerance) {
                    diffs.push(format!("take_profits[{}]", i));
                }
            }
        }

        if diffs.is_empty() {
            ReplayOutcome::Match
        } else {
            ReplayOutcome::Regression(diffs)
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let result: Result<()> = (|| {
            let snapshots = self.snapshots.read().expect("replay lock poisoned");
            let bytes = serde_json::to_vec(&*snapshots)?;
            store.write(SNAPSHOT_KEY, &bytes)
        })();
        if let Err(e) = result {
            warn!(error = %e, "failed to persist replay snapshots");
        }
    }
}

/// Relative closeness: |a - b| <= tol * max(|a|, |b|); exact for equal values
fn rel_close(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= tolerance * a.abs().max(b.abs())
}

fn context_hash(context: &SignalContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.symbol.as_bytes());
    hasher.update(context.timeframe.to_string().as_bytes());
    hasher.update(context.ts.to_le_bytes());
    hasher.update(context.price.to_le_bytes());
    let mut keys: Vec<&String> = context.indicators.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(context.indicators[key].to_le_bytes());
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 12)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SigwatchError;
    use crate::persistence::MemoryKeyedStore;
    use crate::types::{Direction, Timeframe};
    use async_trait::async_trait;
    use uuid::Uuid;

    fn signal(symbol: &str, entry: f64) -> Signal {
        Signal {
            id: Uuid::new_v4().to_string(),
            ts: 0,
            symbol: symbol.to_string(),
            timeframe: Timeframe::Hour4,
            direction: Direction::Long,
            confidence: 0.8,
            entry_price: entry,
            stop_loss: entry * 0.95,
            take_profits: vec![entry * 1.15],
            strategy_id: "test".into(),
        }
    }

    fn context(symbol: &str) -> SignalContext {
        SignalContext::new(symbol, Timeframe::Hour4, 100.0)
    }

    /// Generator that echoes the captured signal, optionally perturbed
    struct EchoGenerator {
        entry_scale: f64,
        fail: bool,
        produce: bool,
    }

    impl EchoGenerator {
        fn faithful() -> Self {
            Self {
                entry_scale: 1.0,
                fail: false,
                produce: true,
            }
        }
    }

    #[async_trait]
    impl SignalGenerator for EchoGenerator {
        async fn generate_signal(&self, ctx: &SignalContext) -> crate::error::Result<Option<Signal>> {
            if self.fail {
                return Err(SigwatchError::TransientIo("generator offline".into()));
            }
            if !self.produce {
                return Ok(None);
            }
            let mut s = signal(&ctx.symbol, 100.0);
            s.entry_price *= self.entry_scale;
            Ok(Some(s))
        }
    }

    #[tokio::test]
    async fn test_unchanged_logic_replays_match() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        harness.capture(context("BTC"), signal("BTC", 100.0));
        harness.capture(context("ETH"), signal("ETH", 100.0));

        let report = harness.replay_all(&EchoGenerator::faithful()).await;
        assert_eq!(report.matches, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_drift_detected_with_field_names() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        harness.capture(context("BTC"), signal("BTC", 100.0));

        let drifted = EchoGenerator {
            entry_scale: 1.02,
            fail: false,
            produce: true,
        };
        let report = harness.replay_all(&drifted).await;
        assert_eq!(report.regressions, 1);
        match &report.results[0].outcome {
            ReplayOutcome::Regression(fields) => {
                assert!(fields.contains(&"entry_price".to_string()));
            }
            other => panic!("expected regression, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tolerance_absorbs_floating_point_noise() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        harness.capture(context("BTC"), signal("BTC", 100.0));

        // 0.005% off: inside the 0.01% tolerance
        let noisy = EchoGenerator {
            entry_scale: 1.00005,
            fail: false,
            produce: true,
        };
        let report = harness.replay_all(&noisy).await;
        assert_eq!(report.matches, 1);
    }

    #[tokio::test]
    async fn test_generator_error_classified_as_error() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        harness.capture(context("BTC"), signal("BTC", 100.0));

        let broken = EchoGenerator {
            entry_scale: 1.0,
            fail: true,
            produce: true,
        };
        let report = harness.replay_all(&broken).await;
        assert_eq!(report.errors, 1);
    }

    #[tokio::test]
    async fn test_vanished_signal_is_a_regression() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        harness.capture(context("BTC"), signal("BTC", 100.0));

        let silent = EchoGenerator {
            entry_scale: 1.0,
            fail: false,
            produce: false,
        };
        let report = harness.replay_all(&silent).await;
        assert_eq!(report.regressions, 1);
    }

    #[tokio::test]
    async fn test_empty_buffer_empty_report() {
        let harness = ReplayHarness::new(ReplayConfig::default());
        let report = harness.replay_all(&EchoGenerator::faithful()).await;
        assert!(report.results.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let harness = ReplayHarness::new(ReplayConfig {
            capacity: 3,
            tolerance: 0.0001,
        });
        for i in 0..5 {
            harness.capture(context(&format!("SYM{}", i)), signal("BTC", 100.0));
        }
        assert_eq!(harness.len(), 3);
        let guard = harness.snapshots.read().unwrap();
        let symbols: Vec<&str> = guard.iter().map(|s| s.context.symbol.as_str()).collect();
        // Oldest two evicted, chronological order preserved
        assert_eq!(symbols, vec!["SYM2", "SYM3", "SYM4"]);
    }

    #[test]
    fn test_buffer_survives_restart_via_store() {
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryKeyedStore::new());
        {
            let harness = ReplayHarness::new(ReplayConfig::default()).with_store(store.clone());
            harness.capture(context("BTC"), signal("BTC", 100.0));
        }
        let restored = ReplayHarness::new(ReplayConfig::default()).with_store(store);
        assert_eq!(restored.len(), 1);
    }
}
