//! Active Trade Tracker
//!
//! State machine per open trade: OPEN → ALERTED_80 → CLOSED (terminal), or
//! OPEN → CLOSED directly when a trade resolves before reaching the alert
//! threshold. The tracker owns the authoritative active set; on closure the
//! trade leaves the set and becomes an immutable journal record.
//!
//! Price lookups happen outside the store lock: `poll` collects symbols
//! under a read lock, fetches quotes lock-free, then applies each update as
//! a single locked transition. One trade's failed quote never blocks the
//! others - the error is recorded on the trade and retried next cycle.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::error::{Result, SigwatchError};
use crate::feeds::{Audience, Notifier, PriceFeed};
use crate::journal::{ExitReason, JournalRecord, OutcomeJournal};
use crate::persistence::{load_json, save_json};
use crate::types::{Direction, Signal, TradeOutcome};

/// Identifier of the one-time take-profit progress alert
pub const ALERT_TP1_80PCT: &str = "tp1_80pct";

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Progress fraction of the entry-to-target distance that fires the
    /// one-time alert
    pub alert_progress_pct: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            alert_progress_pct: 0.80,
        }
    }
}

/// Per-trade lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Open,
    Alerted80,
    Closed,
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeState::Open => write!(f, "OPEN"),
            TradeState::Alerted80 => write!(f, "ALERTED_80"),
            TradeState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A trade currently being tracked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: crate::types::Timeframe,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Ordered nearest first
    pub take_profits: Vec<f64>,
    pub opened_at_ms: i64,
    /// Alerts already fired for this trade; guarantees at-most-once
    pub alerts_sent: HashSet<String>,
    pub state: TradeState,
    pub confidence: f64,
    pub strategy_id: String,
    /// Last observed price (entry price until the first poll)
    pub last_price: f64,
    /// Last quote failure, kept for inspection; cleared on success
    pub last_error: Option<String>,
}

impl ActiveTrade {
    /// Progress toward the nearest unmet take-profit as a fraction of the
    /// entry-to-target distance, clamped to [0, 1]. Adverse moves read 0.
    pub fn progress(&self, price: f64) -> f64 {
        let target = self.take_profits[0];
        let distance = target - self.entry_price;
        if distance == 0.0 {
            return 0.0;
        }
        ((price - self.entry_price) / distance).clamp(0.0, 1.0)
    }

    fn pnl_pct(&self, exit_price: f64) -> f64 {
        let diff = match self.direction {
            Direction::Long => exit_price - self.entry_price,
            Direction::Short => self.entry_price - exit_price,
        };
        diff / self.entry_price * 100.0
    }

    fn crossed_take_profit(&self, price: f64) -> bool {
        let target = self.take_profits[0];
        match self.direction {
            Direction::Long => price >= target,
            Direction::Short => price <= target,
        }
    }

    fn crossed_stop_loss(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    fn to_journal_record(
        &self,
        exit_price: f64,
        outcome: TradeOutcome,
        exit_reason: ExitReason,
        now_ms: i64,
    ) -> JournalRecord {
        let mut alerts: Vec<String> = self.alerts_sent.iter().cloned().collect();
        alerts.sort();
        JournalRecord {
            timestamp: now_ms,
            trade_id: self.id.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            direction: self.direction,
            entry_price: self.entry_price,
            exit_price,
            stop_loss: self.stop_loss,
            outcome,
            exit_reason,
            profit_loss_pct: self.pnl_pct(exit_price),
            duration_secs: (now_ms - self.opened_at_ms) / 1000,
            alerts_sent: alerts.join(";"),
            confidence: self.confidence,
            strategy_id: self.strategy_id.clone(),
        }
    }
}

/// Read-only view for the operator surface
#[derive(Debug, Clone, Serialize)]
pub struct TradeSnapshot {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub state: TradeState,
    pub entry_price: f64,
    pub last_price: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    pub progress_pct: f64,
    pub opened_at_ms: i64,
    pub last_error: Option<String>,
}

/// State transition produced by applying a price
#[derive(Debug)]
pub(crate) enum TradeEvent {
    ThresholdAlert { message: String },
    Closed { record: JournalRecord, message: String },
}

/// Tracker over the authoritative active-trade set
pub struct ActiveTradeTracker {
    config: TrackerConfig,
    trades: RwLock<HashMap<String, ActiveTrade>>,
    journal: Arc<OutcomeJournal>,
    notifier: Arc<dyn Notifier>,
    /// Optional JSON state file so open trades survive a restart
    state_file: Option<PathBuf>,
}

impl ActiveTradeTracker {
    pub fn new(
        config: TrackerConfig,
        journal: Arc<OutcomeJournal>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            trades: RwLock::new(HashMap::new()),
            journal,
            notifier,
            state_file: None,
        }
    }

    /// Persist the active set to this file on every mutation and reload it
    /// at startup
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        if let Ok(Some(saved)) = load_json::<HashMap<String, ActiveTrade>>(&path) {
            info!(trades = saved.len(), "restored active trades from state file");
            *self.trades.write().expect("tracker lock poisoned") = saved;
        }
        self.state_file = Some(path);
        self
    }

    /// Register a newly admitted signal as an open trade.
    ///
    /// A later admission for the same symbol supersedes the tracked trade
    /// (the deduplicator only lets materially different signals through).
    pub fn register(&self, signal: &Signal) -> Result<ActiveTrade> {
        validate_signal(signal)?;

        let trade = ActiveTrade {
            id: signal.id.clone(),
            symbol: signal.symbol.to_uppercase(),
            direction: signal.direction,
            timeframe: signal.timeframe,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            take_profits: signal.take_profits.clone(),
            opened_at_ms: signal.ts,
            alerts_sent: HashSet::new(),
            state: TradeState::Open,
            confidence: signal.confidence,
            strategy_id: signal.strategy_id.clone(),
            last_price: signal.entry_price,
            last_error: None,
        };

        let superseded = {
            let mut trades = self.trades.write().expect("tracker lock poisoned");
            trades.insert(trade.symbol.clone(), trade.clone())
        };
        if let Some(previous) = superseded {
            warn!(
                symbol = %trade.symbol,
                previous_id = %previous.id,
                "superseding already-tracked trade"
            );
            // The evicted trade still resolves through the journal, closed at
            // its last observed price
            let outcome = if previous.pnl_pct(previous.last_price) > 0.0 {
                TradeOutcome::Win
            } else {
                TradeOutcome::Loss
            };
            let record = previous.to_journal_record(
                previous.last_price,
                outcome,
                ExitReason::Manual,
                Utc::now().timestamp_millis(),
            );
            if let Err(e) = self.journal.append(&record) {
                warn!(trade_id = %record.trade_id, error = %e, "journal append failed for superseded trade");
            }
        }
        self.save_state();

        info!(
            symbol = %trade.symbol,
            direction = %trade.direction,
            entry = trade.entry_price,
            stop = trade.stop_loss,
            "📈 tracking new trade"
        );
        Ok(trade)
    }

    /// Poll every open trade once. Quotes are fetched outside the lock;
    /// failures are isolated per trade.
    pub async fn poll(&self, feed: &dyn PriceFeed) {
        let symbols: Vec<String> = {
            let trades = self.trades.read().expect("tracker lock poisoned");
            trades.keys().cloned().collect()
        };

        for symbol in symbols {
            match feed.current_price(&symbol).await {
                Ok(price) => {
                    let events = self.apply_price(&symbol, price);
                    self.dispatch(events).await;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "price lookup failed; retrying next cycle");
                    let mut trades = self.trades.write().expect("tracker lock poisoned");
                    if let Some(trade) = trades.get_mut(&symbol) {
                        trade.last_error = Some(e.to_string());
                    }
                }
            }
        }
    }

    /// Apply one observed price to one trade. Pure state transition under
    /// the write lock; notifications and journaling happen afterwards.
    fn apply_price(&self, symbol: &str, price: f64) -> Vec<TradeEvent> {
        self.apply_price_at(symbol, price, Utc::now().timestamp_millis())
    }

    pub(crate) fn apply_price_at(&self, symbol: &str, price: f64, now_ms: i64) -> Vec<TradeEvent> {
        let mut events = Vec::new();
        let mut trades = self.trades.write().expect("tracker lock poisoned");

        let Some(trade) = trades.get_mut(symbol) else {
            // Closed or never tracked: a no-op
            return events;
        };
        if trade.state == TradeState::Closed {
            return events;
        }

        trade.last_price = price;
        trade.last_error = None;

        // Closure checks first: a price that crosses a boundary resolves the
        // trade regardless of alert progress
        if trade.crossed_stop_loss(price) {
            let record = trade.to_journal_record(price, TradeOutcome::Loss, ExitReason::StopLoss, now_ms);
            let message = format!(
                "❌ {} {} closed LOSS at {:.4} ({:+.2}%)",
                trade.symbol, trade.direction, price, record.profit_loss_pct
            );
            trade.state = TradeState::Closed;
            trades.remove(symbol);
            events.push(TradeEvent::Closed { record, message });
        } else if trade.crossed_take_profit(price) {
            let record = trade.to_journal_record(price, TradeOutcome::Win, ExitReason::TakeProfit, now_ms);
            let message = format!(
                "✅ {} {} closed WIN at {:.4} ({:+.2}%)",
                trade.symbol, trade.direction, price, record.profit_loss_pct
            );
            trade.state = TradeState::Closed;
            trades.remove(symbol);
            events.push(TradeEvent::Closed { record, message });
        } else {
            let progress = trade.progress(price);
            if progress >= self.config.alert_progress_pct
                && trade.alerts_sent.insert(ALERT_TP1_80PCT.to_string())
            {
                trade.state = TradeState::Alerted80;
                events.push(TradeEvent::ThresholdAlert {
                    message: format!(
                        "🎯 {} {} at {:.4}: {:.0}% of the way to take-profit {:.4}",
                        trade.symbol,
                        trade.direction,
                        price,
                        progress * 100.0,
                        trade.take_profits[0]
                    ),
                });
            }
        }

        drop(trades);
        self.save_state();
        events
    }

    /// Operator override: force-close a trade at the given price, bypassing
    /// threshold checks. Win iff the exit is favorable versus entry.
    pub async fn close_manually(&self, symbol: &str, target_price: f64) -> Result<JournalRecord> {
        self.close_manually_at(symbol, target_price, Utc::now().timestamp_millis())
            .await
    }

    pub(crate) async fn close_manually_at(
        &self,
        symbol: &str,
        target_price: f64,
        now_ms: i64,
    ) -> Result<JournalRecord> {
        let symbol = symbol.to_uppercase();
        let record = {
            let mut trades = self.trades.write().expect("tracker lock poisoned");
            let trade = trades.remove(&symbol).ok_or_else(|| {
                SigwatchError::NotFound(format!("no active trade for {}", symbol))
            })?;

            let outcome = if trade.pnl_pct(target_price) > 0.0 {
                TradeOutcome::Win
            } else {
                TradeOutcome::Loss
            };
            trade.to_journal_record(target_price, outcome, ExitReason::Manual, now_ms)
        };
        self.save_state();

        self.journal.append(&record)?;
        self.notifier
            .notify(
                Audience::User,
                &format!(
                    "🔒 {} closed manually at {:.4}: {} ({:+.2}%)",
                    symbol, target_price, record.outcome, record.profit_loss_pct
                ),
            )
            .await;
        Ok(record)
    }

    /// Ordered snapshots of every tracked trade. Read-only.
    pub fn list_active(&self) -> Vec<TradeSnapshot> {
        let trades = self.trades.read().expect("tracker lock poisoned");
        let mut snapshots: Vec<TradeSnapshot> = trades
            .values()
            .map(|t| TradeSnapshot {
                id: t.id.clone(),
                symbol: t.symbol.clone(),
                direction: t.direction,
                state: t.state,
                entry_price: t.entry_price,
                last_price: t.last_price,
                stop_loss: t.stop_loss,
                take_profits: t.take_profits.clone(),
                progress_pct: t.progress(t.last_price) * 100.0,
                opened_at_ms: t.opened_at_ms,
                last_error: t.last_error.clone(),
            })
            .collect();
        snapshots.sort_by_key(|s| s.opened_at_ms);
        snapshots
    }

    pub fn active_count(&self) -> usize {
        self.trades.read().expect("tracker lock poisoned").len()
    }

    async fn dispatch(&self, events: Vec<TradeEvent>) {
        for event in events {
            match event {
                TradeEvent::ThresholdAlert { message } => {
                    self.notifier.notify(Audience::User, &message).await;
                }
                TradeEvent::Closed { record, message } => {
                    if let Err(e) = self.journal.append(&record) {
                        // Keep the operator in the loop; the trade is already
                        // out of the active set and must not be silently lost
                        warn!(trade_id = %record.trade_id, error = %e, "journal append failed");
                        self.notifier
                            .notify(
                                Audience::Operator,
                                &format!("journal append failed for trade {}: {}", record.trade_id, e),
                            )
                            .await;
                    }
                    self.notifier.notify(Audience::User, &message).await;
                }
            }
        }
    }

    /// Flush dispatchable events for a directly applied price. Test and
    /// engine seam around `apply_price`.
    pub async fn apply_and_dispatch(&self, symbol: &str, price: f64) {
        let events = self.apply_price(symbol, price);
        self.dispatch(events).await;
    }

    #[cfg(test)]
    pub(crate) async fn apply_and_dispatch_at(&self, symbol: &str, price: f64, now_ms: i64) {
        let events = self.apply_price_at(symbol, price, now_ms);
        self.dispatch(events).await;
    }

    fn save_state(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let trades = self.trades.read().expect("tracker lock poisoned");
        if let Err(e) = save_json(path, &*trades) {
            warn!(error = %e, "failed to save tracker state");
        }
    }
}

pub(crate) fn validate_signal(signal: &Signal) -> Result<()> {
    if signal.take_profits.is_empty() {
        return Err(SigwatchError::Validation(format!(
            "signal {} has no take-profit levels",
            signal.id
        )));
    }
    if !(signal.entry_price.is_finite() && signal.entry_price > 0.0) {
        return Err(SigwatchError::Validation(format!(
            "signal {} has invalid entry price {}",
            signal.id, signal.entry_price
        )));
    }
    let stop_ok = match signal.direction {
        Direction::Long => signal.stop_loss < signal.entry_price,
        Direction::Short => signal.stop_loss > signal.entry_price,
    };
    if !stop_ok {
        return Err(SigwatchError::Validation(format!(
            "signal {} stop-loss {} on the wrong side of entry {}",
            signal.id, signal.stop_loss, signal.entry_price
        )));
    }
    let tp_ok = signal.take_profits.iter().all(|tp| match signal.direction {
        Direction::Long => *tp > signal.entry_price,
        Direction::Short => *tp < signal.entry_price,
    });
    if !tp_ok {
        return Err(SigwatchError::Validation(format!(
            "signal {} has take-profit levels on the wrong side of entry",
            signal.id
        )));
    }
    Ok(())
}
