//! Signal Deduplicator
//!
//! Decides whether a freshly generated signal is a near-duplicate of one
//! already emitted. Records live in durable keyed storage (one JSON record
//! per fingerprint) so decisions survive a restart.
//!
//! Every duplicate observation refreshes `last_checked_at` and persists the
//! refresh before returning - a fingerprint under continuous duplicate
//! pressure never ages out of retention, while genuinely stale ones do.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::persistence::KeyedStore;
use crate::types::SignalFingerprint;

/// Deduplication configuration
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Relative entry-price delta treated as materially different
    /// (inclusive boundary: exactly this delta admits)
    pub price_delta_threshold: f64,
    /// Records unchecked for longer than this are removed by the sweep
    pub retention_hours: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            price_delta_threshold: 0.015,
            retention_hours: 168,
        }
    }
}

/// Stored per-fingerprint state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Entry price at first admission (or last material change)
    pub entry_price: f64,
    /// When the signal was actually emitted; set once per admission
    pub sent_at_ms: i64,
    /// Refreshed on every duplicate observation, admitted or suppressed.
    /// None only on rows written by the legacy format; those fall back to
    /// `sent_at_ms` for one retention pass and are upgraded on next check.
    #[serde(default)]
    pub last_checked_at_ms: Option<i64>,
    pub confidence: f64,
    pub strategy_id: String,
}

impl DedupRecord {
    /// Timestamp retention decisions are made against
    fn retention_anchor(&self) -> i64 {
        self.last_checked_at_ms.unwrap_or(self.sent_at_ms)
    }
}

/// Admission decision for a candidate signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record existed for this fingerprint
    AdmitFirst,
    /// A record existed but the entry price moved materially
    AdmitNew,
    /// Near-duplicate of the active record
    Suppress,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::AdmitFirst => write!(f, "ADMIT_FIRST"),
            Decision::AdmitNew => write!(f, "ADMIT_NEW"),
            Decision::Suppress => write!(f, "SUPPRESS"),
        }
    }
}

/// Deduplicator over a durable keyed store
pub struct SignalDeduplicator {
    config: DedupConfig,
    store: Arc<dyn KeyedStore>,
}

impl SignalDeduplicator {
    pub fn new(config: DedupConfig, store: Arc<dyn KeyedStore>) -> Self {
        Self { config, store }
    }

    /// Decide whether to admit a candidate signal.
    ///
    /// On admission the record is (re)written; on suppression the
    /// `last_checked_at` refresh is persisted before this returns.
    pub fn should_admit(
        &self,
        fingerprint: &SignalFingerprint,
        candidate_entry_price: f64,
        confidence: f64,
    ) -> Result<Decision> {
        self.should_admit_at(
            fingerprint,
            candidate_entry_price,
            confidence,
            Utc::now().timestamp_millis(),
        )
    }

    pub(crate) fn should_admit_at(
        &self,
        fingerprint: &SignalFingerprint,
        candidate_entry_price: f64,
        confidence: f64,
        now_ms: i64,
    ) -> Result<Decision> {
        let key = fingerprint.key();
        let existing = self.load(&key)?;

        let decision = match existing {
            None => {
                let record = DedupRecord {
                    entry_price: candidate_entry_price,
                    sent_at_ms: now_ms,
                    last_checked_at_ms: Some(now_ms),
                    confidence,
                    strategy_id: fingerprint.strategy.clone().unwrap_or_default(),
                };
                self.save(&key, &record)?;
                Decision::AdmitFirst
            }
            Some(mut record) => {
                let delta =
                    (candidate_entry_price - record.entry_price).abs() / record.entry_price;
                if delta >= self.config.price_delta_threshold {
                    // Materially different signal - treat as new
                    record.entry_price = candidate_entry_price;
                    record.sent_at_ms = now_ms;
                    record.last_checked_at_ms = Some(now_ms);
                    record.confidence = confidence;
                    self.save(&key, &record)?;
                    Decision::AdmitNew
                } else {
                    // Suppressed, but the check itself must be durable so the
                    // record is not evicted by retention and re-emitted after
                    // a restart
                    record.last_checked_at_ms = Some(now_ms);
                    self.save(&key, &record)?;
                    Decision::Suppress
                }
            }
        };

        debug!(fingerprint = %key, %decision, price = candidate_entry_price, "dedup check");
        Ok(decision)
    }

    /// Remove records whose last check is older than the retention window.
    /// Legacy rows without `last_checked_at` are judged by `sent_at` and
    /// survive until their next check upgrades them. Returns removed count.
    pub fn prune_stale(&self) -> Result<usize> {
        self.prune_stale_at(Utc::now().timestamp_millis())
    }

    pub(crate) fn prune_stale_at(&self, now_ms: i64) -> Result<usize> {
        let retention_ms = self.config.retention_hours * 3600 * 1000;
        let mut removed = 0;
        for key in self.store.keys()? {
            let Some(record) = self.load(&key)? else {
                continue;
            };
            if now_ms - record.retention_anchor() > retention_ms {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "dedup retention sweep removed stale fingerprints");
        }
        Ok(removed)
    }

    /// Look up the stored record for a fingerprint, if any
    pub fn record(&self, fingerprint: &SignalFingerprint) -> Result<Option<DedupRecord>> {
        self.load(&fingerprint.key())
    }

    fn load(&self, key: &str) -> Result<Option<DedupRecord>> {
        match self.store.read(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, record: &DedupRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store.write(key, &bytes)
    }
}
