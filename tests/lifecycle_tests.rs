//! End-to-end lifecycle tests: admission through dedup, tracking against a
//! scripted feed, outcome journaling and replay regression checks.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    use sigwatch::cache::{CacheConfig, ExpiringCache};
    use sigwatch::dedup::{Decision, DedupConfig, SignalDeduplicator};
    use sigwatch::engine::SignalEngine;
    use sigwatch::error::{Result, SigwatchError};
    use sigwatch::feeds::{Audience, Notifier, PriceFeed, SignalGenerator};
    use sigwatch::jobs::{JobRunner, JobStatsRegistry};
    use sigwatch::journal::{ExitReason, OutcomeJournal};
    use sigwatch::persistence::MemoryKeyedStore;
    use sigwatch::replay::{ReplayConfig, ReplayHarness};
    use sigwatch::tracker::{ActiveTradeTracker, TrackerConfig};
    use sigwatch::types::{Direction, Signal, SignalContext, Timeframe};

    /// Feed returning a price set by the test
    struct ScriptedFeed {
        price: Mutex<f64>,
    }

    impl ScriptedFeed {
        fn at(price: f64) -> Self {
            Self {
                price: Mutex::new(price),
            }
        }

        fn set(&self, price: f64) {
            *self.price.lock().unwrap() = price;
        }
    }

    #[async_trait]
    impl PriceFeed for ScriptedFeed {
        async fn current_price(&self, _symbol: &str) -> Result<f64> {
            Ok(*self.price.lock().unwrap())
        }
    }

    /// Notifier capturing every message for assertions
    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(Audience, String)>>,
    }

    impl RecordingNotifier {
        fn user_messages(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == Audience::User)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, audience: Audience, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((audience, message.to_string()));
        }
    }

    /// Generator that always reproduces the signal it was given
    struct EchoGenerator {
        signal: Signal,
    }

    #[async_trait]
    impl SignalGenerator for EchoGenerator {
        async fn generate_signal(&self, _context: &SignalContext) -> Result<Option<Signal>> {
            Ok(Some(self.signal.clone()))
        }
    }

    struct Harness {
        engine: SignalEngine,
        tracker: Arc<ActiveTradeTracker>,
        notifier: Arc<RecordingNotifier>,
        dir: std::path::PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn build_harness() -> Harness {
        let dir = std::env::temp_dir().join(format!("sigwatch-it-{}", Uuid::new_v4()));
        let journal = Arc::new(OutcomeJournal::new(dir.to_str().unwrap()).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = Arc::new(ActiveTradeTracker::new(
            TrackerConfig::default(),
            journal.clone(),
            notifier.clone(),
        ));
        let dedup = Arc::new(SignalDeduplicator::new(
            DedupConfig::default(),
            Arc::new(MemoryKeyedStore::new()),
        ));
        let replay = Arc::new(ReplayHarness::new(ReplayConfig::default()));
        let runner = JobRunner::new(notifier.clone(), Arc::new(JobStatsRegistry::new()));
        let engine = SignalEngine::new(
            dedup,
            tracker.clone(),
            replay,
            journal,
            notifier.clone(),
            Arc::new(ScriptedFeed::at(100.0)),
            Arc::new(ExpiringCache::new(CacheConfig::default())),
            runner,
        );
        Harness {
            engine,
            tracker,
            notifier,
            dir,
        }
    }

    fn long_signal(entry: f64) -> Signal {
        Signal::new(
            "BTC",
            Timeframe::Hour4,
            Direction::Long,
            0.72,
            entry,
            95.0,
            vec![115.0],
            "breakout",
        )
    }

    fn context_for(signal: &Signal) -> SignalContext {
        SignalContext::new(&signal.symbol, signal.timeframe, signal.entry_price)
    }

    #[tokio::test]
    async fn full_win_path_admission_alert_and_journal() {
        let h = build_harness();
        let signal = long_signal(100.0);
        let context = context_for(&signal);

        let decision = h.engine.handle_candidate(&signal, &context).await.unwrap();
        assert_eq!(decision, Decision::AdmitFirst);
        assert_eq!(h.engine.active_trades().len(), 1);

        // Near-duplicate is suppressed and the tracked trade untouched
        let dup = long_signal(100.4);
        let decision = h.engine.handle_candidate(&dup, &context).await.unwrap();
        assert_eq!(decision, Decision::Suppress);
        assert_eq!(h.engine.active_trades().len(), 1);

        // 112 is 80% of the way from 100 to 115: exactly one alert
        let feed = ScriptedFeed::at(112.0);
        h.tracker.poll(&feed).await;
        h.tracker.poll(&feed).await;
        let alerts: Vec<String> = h
            .notifier
            .user_messages()
            .into_iter()
            .filter(|m| m.contains("way to take-profit"))
            .collect();
        assert_eq!(alerts.len(), 1);

        // Crossing the target closes the trade as a WIN
        feed.set(115.0);
        h.tracker.poll(&feed).await;
        assert!(h.engine.active_trades().is_empty());

        let stats = h.engine.statistics().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.wins, 1);
        assert!((stats.win_rate - 1.0).abs() < f64::EPSILON);
        assert!((stats.total_pnl_pct - 15.0).abs() < 1e-9);

        // Poll after close is a no-op
        h.tracker.poll(&feed).await;
        assert_eq!(h.engine.statistics().unwrap().total, 1);
    }

    #[tokio::test]
    async fn rejected_candidate_does_not_consume_fingerprint() {
        let h = build_harness();
        let mut malformed = long_signal(100.0);
        malformed.take_profits.clear();
        let context = context_for(&malformed);

        let err = h
            .engine
            .handle_candidate(&malformed, &context)
            .await
            .unwrap_err();
        assert!(matches!(err, SigwatchError::Validation(_)));
        assert!(h.engine.active_trades().is_empty());

        // The rejection must not have written a dedup record: an identical
        // valid signal is still a first sighting
        let valid = long_signal(100.0);
        let decision = h
            .engine
            .handle_candidate(&valid, &context_for(&valid))
            .await
            .unwrap();
        assert_eq!(decision, Decision::AdmitFirst);
        assert_eq!(h.engine.active_trades().len(), 1);
    }

    #[tokio::test]
    async fn materially_different_entry_supersedes_tracked_trade() {
        let h = build_harness();
        let first = long_signal(100.0);
        let context = context_for(&first);
        h.engine.handle_candidate(&first, &context).await.unwrap();

        // 1.5% away is inclusive: admitted as new, replacing the open trade
        let moved = long_signal(101.5);
        let decision = h.engine.handle_candidate(&moved, &context).await.unwrap();
        assert_eq!(decision, Decision::AdmitNew);

        let active = h.engine.active_trades();
        assert_eq!(active.len(), 1);
        assert!((active[0].entry_price - 101.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stop_loss_journals_a_loss() {
        let h = build_harness();
        let signal = long_signal(100.0);
        let context = context_for(&signal);
        h.engine.handle_candidate(&signal, &context).await.unwrap();

        let feed = ScriptedFeed::at(95.0);
        h.tracker.poll(&feed).await;

        assert!(h.engine.active_trades().is_empty());
        let stats = h.engine.statistics().unwrap();
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.exits_stop_loss, 1);
        assert!((stats.win_rate).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn manual_close_and_unknown_symbol() {
        let h = build_harness();
        let signal = long_signal(100.0);
        let context = context_for(&signal);
        h.engine.handle_candidate(&signal, &context).await.unwrap();

        let record = h.engine.close_trade("BTC", 104.0).await.unwrap();
        assert_eq!(record.exit_reason, ExitReason::Manual);
        assert!((record.profit_loss_pct - 4.0).abs() < 1e-9);

        let err = h.engine.close_trade("ETH", 104.0).await.unwrap_err();
        assert!(matches!(err, SigwatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn replay_report_clean_when_generation_unchanged() {
        let h = build_harness();
        let signal = long_signal(100.0);
        let context = context_for(&signal);
        h.engine.handle_candidate(&signal, &context).await.unwrap();

        let generator = EchoGenerator {
            signal: signal.clone(),
        };
        let report = h.engine.replay_report(&generator).await;
        assert_eq!(report.results.len(), 1);
        assert!(report.is_clean());
    }
}
