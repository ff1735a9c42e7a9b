// src/providers/spot.rs
use async_trait::async_trait;
use backon::Retryable;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{PriceProvider, ProviderError, ProviderKind, RetryPolicy};
use crate::config::ApiConfig;
use crate::types::{now_unix_secs, ParsedMetrics, RawResponse};

/// Polls a single HTTP endpoint that returns a BTC/USD spot quote.
pub struct HttpPriceProvider {
    pub http: reqwest::Client,
    pub kind: ProviderKind,
    pub source: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpPriceProvider {
    /// A missing endpoint falls back to the kind's default. A blank one is
    /// kept so that [`PriceProvider::validate_config`] rejects it.
    pub fn new(kind: ProviderKind, api: &ApiConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            kind,
            source: api.provider.clone(),
            endpoint: api
                .endpoint
                .clone()
                .unwrap_or_else(|| kind.default_endpoint().to_string()),
            timeout: api.timeout(),
            retry: api.retry.into(),
        }
    }

    async fn get_once(&self) -> Result<RawResponse, ProviderError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<RawResponse>().await?)
    }
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    fn name(&self) -> &str {
        &self.source
    }

    async fn fetch_data(&self) -> Option<RawResponse> {
        if self.retry.max_attempts == 0 {
            tracing::error!(endpoint = %self.endpoint, "max_attempts is 0, not fetching");
            return None;
        }

        let mut attempt = 0u32;
        let result = (|| self.get_once())
            .retry(self.retry)
            .sleep(tokio::time::sleep)
            .notify(|err: &ProviderError, wait: Duration| {
                attempt += 1;
                tracing::warn!(attempt, ?wait, "fetch attempt failed: {err}");
            })
            .await;

        match result {
            Ok(raw) => Some(raw),
            Err(err) => {
                tracing::error!(endpoint = %self.endpoint, attempts = self.retry.max_attempts, "failed to fetch data: {err}");
                None
            }
        }
    }

    fn parse_response(&self, raw: &RawResponse) -> ParsedMetrics {
        parse_spot_response(raw)
    }

    fn validate_config(&self) -> bool {
        if self.endpoint.trim().is_empty() {
            tracing::error!(provider = %self.source, "no endpoint configured");
            return false;
        }
        true
    }
}

/// Known upstream payloads, tried in declaration order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpotShape {
    /// `{"data": {"amount": "45123.45", ...}}`
    Spot { data: SpotAmount },
    /// `{"bitcoin": {"usd": 45123.45}}`
    Ticker { bitcoin: TickerUsd },
    /// `{"bpi": {"USD": {"rate_float": 45123.4567, ...}}}`
    RateCard { bpi: Value },
}

#[derive(Debug, Deserialize)]
struct SpotAmount {
    amount: Value,
}

#[derive(Debug, Deserialize)]
struct TickerUsd {
    usd: Value,
}

/// Extract the BTC price from whichever known shape `raw` has.
///
/// Any non-empty object gets `last_updated` stamped with the wall clock, even
/// when no price could be read. An empty or non-object payload yields nothing.
pub fn parse_spot_response(raw: &RawResponse) -> ParsedMetrics {
    let Some(obj) = raw.as_object() else {
        if !raw.is_null() {
            tracing::warn!("response is not a JSON object");
        }
        return ParsedMetrics::empty();
    };
    if obj.is_empty() {
        return ParsedMetrics::empty();
    }

    let price = match SpotShape::deserialize(raw) {
        Ok(SpotShape::Spot { data }) => read_price("spot", &data.amount),
        Ok(SpotShape::Ticker { bitcoin }) => read_price("ticker", &bitcoin.usd),
        Ok(SpotShape::RateCard { bpi }) => match bpi.get("USD").and_then(|usd| usd.get("rate_float")) {
            Some(rate) => read_price("rate card", rate),
            None => {
                tracing::warn!("no USD rate_float found in response");
                None
            }
        },
        Err(_) => {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            tracing::warn!(?keys, "unknown response format");
            None
        }
    };

    ParsedMetrics { bitcoin_price: price, last_updated: Some(now_unix_secs()) }
}

fn read_price(shape: &str, field: &Value) -> Option<f64> {
    match numeric(field) {
        Ok(px) => {
            tracing::info!(shape, price = px, "parsed response");
            Some(px)
        }
        Err(e) => {
            tracing::error!(shape, "invalid USD price format: {e}");
            None
        }
    }
}

/// Numbers and numeric strings both count.
fn numeric(v: &Value) -> Result<f64, ProviderError> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| ProviderError::Malformed(n.to_string())),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| ProviderError::Malformed(s.clone())),
        other => Err(ProviderError::Malformed(other.to_string())),
    }
}
