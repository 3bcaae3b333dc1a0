//! Core types used throughout sigwatch
//!
//! Defines the shared vocabulary for signals, fingerprints and trade outcomes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Long
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Supported timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min15,
    Hour1,
    Hour4,
    Day1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Hour4
    }
}

impl Timeframe {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" => Some(Timeframe::Hour1),
            "4h" | "4hour" => Some(Timeframe::Hour4),
            "1d" | "1day" => Some(Timeframe::Day1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Hour1 => write!(f, "1h"),
            Timeframe::Hour4 => write!(f, "4h"),
            Timeframe::Day1 => write!(f, "1d"),
        }
    }
}

/// Final outcome of a resolved trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Win => write!(f, "WIN"),
            TradeOutcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// Deduplication key derived from the identifying fields of a signal.
///
/// Two signals with the same fingerprint describe the same trade idea; the
/// deduplicator decides whether the newer one is materially different.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFingerprint {
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    /// Optional strategy tag so distinct strategies never collide
    pub strategy: Option<String>,
}

impl SignalFingerprint {
    pub fn new(symbol: &str, direction: Direction, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            direction,
            timeframe,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    /// Canonical store key, e.g. `BTC:LONG:4h` or `BTC:LONG:4h:breakout`
    pub fn key(&self) -> String {
        match &self.strategy {
            Some(tag) => format!("{}:{}:{}:{}", self.symbol, self.direction, self.timeframe, tag),
            None => format!("{}:{}:{}", self.symbol, self.direction, self.timeframe),
        }
    }
}

impl fmt::Display for SignalFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Trading signal produced by the external signal generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal ID
    pub id: String,
    /// Timestamp in milliseconds
    pub ts: i64,
    /// Symbol, e.g. "BTC"
    pub symbol: String,
    /// Timeframe the signal was derived on
    pub timeframe: Timeframe,
    /// Trade direction
    pub direction: Direction,
    /// Confidence level (0.0 - 1.0)
    pub confidence: f64,
    /// Suggested entry price
    pub entry_price: f64,
    /// Stop-loss price
    pub stop_loss: f64,
    /// Take-profit levels, ordered nearest first
    pub take_profits: Vec<f64>,
    /// Strategy that generated this signal
    pub strategy_id: String,
}

impl Signal {
    /// Build a signal with a fresh ID and the current timestamp
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        direction: Direction,
        confidence: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profits: Vec<f64>,
        strategy_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now().timestamp_millis(),
            symbol: symbol.to_uppercase(),
            timeframe,
            direction,
            confidence,
            entry_price,
            stop_loss,
            take_profits,
            strategy_id: strategy_id.to_string(),
        }
    }

    /// Derive the deduplication fingerprint for this signal
    pub fn fingerprint(&self) -> SignalFingerprint {
        SignalFingerprint::new(&self.symbol, self.direction, self.timeframe)
            .with_strategy(&self.strategy_id)
    }
}

/// Input context a signal was derived from.
///
/// Captured alongside the produced signal so the replay harness can re-run
/// the generator against identical inputs later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalContext {
    /// Timestamp in milliseconds
    pub ts: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Market price at generation time
    pub price: f64,
    /// Indicator values the generator consumed (name -> value)
    pub indicators: HashMap<String, f64>,
}

impl SignalContext {
    pub fn new(symbol: &str, timeframe: Timeframe, price: f64) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            symbol: symbol.to_uppercase(),
            timeframe,
            price,
            indicators: HashMap::new(),
        }
    }
}
