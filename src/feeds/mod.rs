//! External collaborator interfaces
//!
//! The core treats the price feed, the notification channel and the signal
//! generator as opaque collaborators behind async traits. Production wiring
//! plugs in the HTTP feed and a real transport; tests plug in scripted
//! doubles.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, SigwatchError};
use crate::types::{Signal, SignalContext};

/// Who a notification is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// End users receiving trade alerts
    User,
    /// Operator channel for escalations
    Operator,
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::User => write!(f, "user"),
            Audience::Operator => write!(f, "operator"),
        }
    }
}

/// Price feed collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current price for a symbol. A timeout is a `TransientIo`.
    async fn current_price(&self, symbol: &str) -> Result<f64>;
}

/// Notification channel collaborator. Fire-and-forget: failures are logged,
/// not retried here (retries belong to the job wrapper when a notify-heavy
/// task is itself wrapped).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, audience: Audience, message: &str);
}

/// Signal generation collaborator. Pure with respect to the core: the same
/// context replays to the same signal unless the generation logic drifted.
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    async fn generate_signal(&self, context: &SignalContext) -> Result<Option<Signal>>;
}

/// HTTP price feed client
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SigwatchError::Permanent(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}?symbol={}USDT", self.base_url, symbol.to_uppercase());
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SigwatchError::TransientIo(format!(
                "price feed returned {} for {}",
                response.status(),
                symbol
            )));
        }

        let ticker: TickerResponse = response.json().await?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| SigwatchError::Validation(format!("malformed price for {}: {}", symbol, e)))
    }
}

/// Price feed memoized through the expiring cache.
///
/// Used on the signal-generation and dedup path, where many candidates for
/// the same symbol arrive in bursts; the tracker's poll loop uses the raw
/// feed so closure decisions always see a fresh quote.
pub struct CachedPriceFeed {
    inner: std::sync::Arc<dyn PriceFeed>,
    cache: std::sync::Arc<crate::cache::ExpiringCache<String, f64>>,
}

impl CachedPriceFeed {
    pub fn new(
        inner: std::sync::Arc<dyn PriceFeed>,
        cache: std::sync::Arc<crate::cache::ExpiringCache<String, f64>>,
    ) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl PriceFeed for CachedPriceFeed {
    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let key = symbol.to_uppercase();
        if let Some(price) = self.cache.get(&key) {
            return Ok(price);
        }
        let price = self.inner.current_price(&key).await?;
        self.cache.put(key, price);
        Ok(price)
    }
}

/// Notifier that writes to the log only. Stands in until a real transport
/// (chat bot, webhook) is wired up, and doubles as the operator channel in
/// single-process deployments.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, audience: Audience, message: &str) {
        match audience {
            Audience::User => info!(%audience, "📣 {}", message),
            Audience::Operator => warn!(%audience, "🚨 {}", message),
        }
    }
}
