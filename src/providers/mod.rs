// src/providers/mod.rs
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ApiConfig, ConfigError, RetryConfig};
use crate::types::{ParsedMetrics, RawResponse};

pub mod spot;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed price field: {0}")]
    Malformed(String),
}

/// One upstream price API.
///
/// Implementations never surface errors to the caller: a failed fetch is
/// `None`, a failed parse is a [`ParsedMetrics`] without a price.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Value of the `source` label on the price gauge.
    fn name(&self) -> &str;

    /// GET the configured endpoint, retrying transport failures.
    async fn fetch_data(&self) -> Option<RawResponse>;

    fn parse_response(&self, raw: &RawResponse) -> ParsedMetrics;

    /// True iff an endpoint is present.
    fn validate_config(&self) -> bool;
}

/// Upstream APIs known by name. All of them speak every response shape
/// [`spot::parse_spot_response`] understands; they differ in default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Coindesk,
    Coinbase,
    CoinGecko,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "coindesk" => Some(Self::Coindesk),
            "coinbase" => Some(Self::Coinbase),
            "coingecko" => Some(Self::CoinGecko),
            _ => None,
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            // the old coindesk BPI endpoint is gone; coinbase needs no key
            Self::Coindesk | Self::Coinbase => "https://api.coinbase.com/v2/prices/BTC-USD/spot",
            Self::CoinGecko => "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd",
        }
    }
}

/// Build the provider named in `api.provider`.
pub fn build_provider(api: &ApiConfig, http: reqwest::Client) -> Result<Arc<dyn PriceProvider>, ConfigError> {
    let kind = ProviderKind::from_name(&api.provider)
        .ok_or_else(|| ConfigError::UnknownProvider(api.provider.clone()))?;
    Ok(Arc::new(spot::HttpPriceProvider::new(kind, api, http)))
}

/// Attempts and exponential delays for [`PriceProvider::fetch_data`].
///
/// The delay before retry `n` (0-based) is `backoff^n` seconds, so the first
/// wait is always one second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: f64) -> Self {
        Self { max_attempts, backoff }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(c: RetryConfig) -> Self {
        Self::new(c.max_attempts, c.backoff)
    }
}

impl backon::BackoffBuilder for RetryPolicy {
    type Backoff = RetryDelays;

    fn build(self) -> Self::Backoff {
        RetryDelays { policy: self, next: 0 }
    }
}

/// Sleeps between attempts only: `max_attempts - 1` items.
#[derive(Debug, Clone)]
pub struct RetryDelays {
    policy: RetryPolicy,
    next: u32,
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next + 1 >= self.policy.max_attempts {
            return None;
        }
        let d = self.policy.delay(self.next);
        self.next += 1;
        Some(d)
    }
}
