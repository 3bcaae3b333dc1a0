//! Error taxonomy for sigwatch
//!
//! Domain components raise these; they never retry themselves. Retries and
//! escalation are the job wrapper's responsibility (see `jobs`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SigwatchError>;

#[derive(Debug, Error)]
pub enum SigwatchError {
    /// Referenced trade or fingerprint does not exist. Surfaced to the
    /// caller, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or network hiccup. Retryable by the job wrapper.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Malformed signal or price. The offending item is logged and skipped;
    /// sibling work continues.
    #[error("validation error: {0}")]
    Validation(String),

    /// Retries exhausted. Escalated to the operator channel; the task run
    /// is a no-op for that cycle.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl SigwatchError {
    /// Whether the job wrapper should retry this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, SigwatchError::TransientIo(_))
    }
}

impl From<std::io::Error> for SigwatchError {
    fn from(e: std::io::Error) -> Self {
        SigwatchError::TransientIo(e.to_string())
    }
}

impl From<serde_json::Error> for SigwatchError {
    fn from(e: serde_json::Error) -> Self {
        SigwatchError::Validation(e.to_string())
    }
}

impl From<csv::Error> for SigwatchError {
    fn from(e: csv::Error) -> Self {
        SigwatchError::TransientIo(e.to_string())
    }
}

impl From<reqwest::Error> for SigwatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            SigwatchError::TransientIo(e.to_string())
        } else {
            SigwatchError::Permanent(e.to_string())
        }
    }
}
