//! Outcome Journal & Statistics
//!
//! Append-only CSV record of resolved trades plus running aggregates.
//! Records are immutable once appended; statistics are a pure fold over the
//! full journal and are never hand-patched.

use anyhow::Context;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use crate::error::{Result, SigwatchError};
use crate::types::{Direction, Timeframe, TradeOutcome};

/// Why a trade left the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::Manual => write!(f, "MANUAL"),
        }
    }
}

/// Immutable snapshot of a closed trade. Appended once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Close timestamp in milliseconds
    pub timestamp: i64,
    pub trade_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub outcome: TradeOutcome,
    pub exit_reason: ExitReason,
    pub profit_loss_pct: f64,
    pub duration_secs: i64,
    /// Threshold alerts fired during the trade, semicolon-joined
    pub alerts_sent: String,
    pub confidence: f64,
    pub strategy_id: String,
}

/// Derived aggregates, recomputed deterministically from journal contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    /// wins / (wins + losses); 0 when empty
    pub win_rate: f64,
    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
    pub avg_duration_secs: f64,
    pub exits_take_profit: usize,
    pub exits_stop_loss: usize,
    pub exits_manual: usize,
}

impl Statistics {
    /// Pure fold over journal records
    pub fn from_records(records: &[JournalRecord]) -> Self {
        let mut stats = Statistics {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.outcome {
                TradeOutcome::Win => stats.wins += 1,
                TradeOutcome::Loss => stats.losses += 1,
            }
            match record.exit_reason {
                ExitReason::TakeProfit => stats.exits_take_profit += 1,
                ExitReason::StopLoss => stats.exits_stop_loss += 1,
                ExitReason::Manual => stats.exits_manual += 1,
            }
            stats.total_pnl_pct += record.profit_loss_pct;
            stats.avg_duration_secs += record.duration_secs as f64;
        }
        let resolved = stats.wins + stats.losses;
        if resolved > 0 {
            stats.win_rate = stats.wins as f64 / resolved as f64;
            stats.avg_pnl_pct = stats.total_pnl_pct / resolved as f64;
            stats.avg_duration_secs /= resolved as f64;
        }
        stats
    }

    pub fn summary(&self) -> String {
        format!(
            "trades={} wins={} losses={} win_rate={:.1}% total_pnl={:+.2}%",
            self.total,
            self.wins,
            self.losses,
            self.win_rate * 100.0,
            self.total_pnl_pct
        )
    }
}

/// Append-only journal backed by a CSV file
pub struct OutcomeJournal {
    path: PathBuf,
    /// Held through serialize + flush so a statistics reader never observes
    /// a half-written row
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl OutcomeJournal {
    pub fn new(data_dir: &str) -> anyhow::Result<Self> {
        let dir = Path::new(data_dir).join("journal");
        fs::create_dir_all(&dir).context("Failed to create journal directory")?;
        let path = dir.join("outcomes.csv");

        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open journal file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Durable append. The record is visible to `recompute_statistics` as
    /// soon as this returns.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let mut writer = self.writer.lock().expect("journal lock poisoned");
        writer.serialize(record)?;
        writer
            .flush()
            .map_err(|e| SigwatchError::TransientIo(format!("flush journal: {}", e)))?;
        info!(
            trade_id = %record.trade_id,
            symbol = %record.symbol,
            outcome = %record.outcome,
            pnl_pct = record.profit_loss_pct,
            "📒 journaled trade outcome"
        );
        Ok(())
    }

    /// Load every record back from disk
    pub fn load_all(&self) -> Result<Vec<JournalRecord>> {
        // Take the writer lock so an in-flight append's flush completes first
        let _guard = self.writer.lock().expect("journal lock poisoned");

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .map_err(|e| SigwatchError::TransientIo(format!("open journal: {}", e)))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: JournalRecord = row?;
            records.push(record);
        }
        Ok(records)
    }

    /// Full-scan recompute. Safe to call at any time.
    pub fn recompute_statistics(&self) -> Result<Statistics> {
        let records = self.load_all()?;
        Ok(Statistics::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(outcome: TradeOutcome, reason: ExitReason, pnl: f64) -> JournalRecord {
        JournalRecord {
            timestamp: Utc::now().timestamp_millis(),
            trade_id: Uuid::new_v4().to_string(),
            symbol: "BTC".into(),
            timeframe: Timeframe::Hour4,
            direction: Direction::Long,
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + pnl / 100.0),
            stop_loss: 95.0,
            outcome,
            exit_reason: reason,
            profit_loss_pct: pnl,
            duration_secs: 3600,
            alerts_sent: "tp1_80pct".into(),
            confidence: 0.8,
            strategy_id: "test".into(),
        }
    }

    fn temp_journal() -> (OutcomeJournal, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sigwatch-journal-{}", Uuid::new_v4()));
        let journal = OutcomeJournal::new(dir.to_str().unwrap()).unwrap();
        (journal, dir)
    }

    #[test]
    fn test_win_rate_matches_journal() {
        let (journal, dir) = temp_journal();
        journal.append(&record(TradeOutcome::Win, ExitReason::TakeProfit, 15.0)).unwrap();
        journal.append(&record(TradeOutcome::Win, ExitReason::TakeProfit, 8.0)).unwrap();
        journal.append(&record(TradeOutcome::Loss, ExitReason::StopLoss, -5.0)).unwrap();

        let stats = journal.recompute_statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_pnl_pct - 18.0).abs() < 1e-9);
        assert_eq!(stats.exits_take_profit, 2);
        assert_eq!(stats.exits_stop_loss, 1);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_journal_zero_win_rate() {
        let (journal, dir) = temp_journal();
        let stats = journal.recompute_statistics().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.win_rate, 0.0);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("sigwatch-journal-{}", Uuid::new_v4()));
        {
            let journal = OutcomeJournal::new(dir.to_str().unwrap()).unwrap();
            journal.append(&record(TradeOutcome::Win, ExitReason::Manual, 2.0)).unwrap();
        }
        let reopened = OutcomeJournal::new(dir.to_str().unwrap()).unwrap();
        reopened.append(&record(TradeOutcome::Loss, ExitReason::StopLoss, -3.0)).unwrap();

        let records = reopened.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, TradeOutcome::Win);
        assert_eq!(records[1].outcome, TradeOutcome::Loss);
        fs::remove_dir_all(dir).ok();
    }
}
