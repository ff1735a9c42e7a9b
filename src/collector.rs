// src/collector.rs
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::metrics::ExporterMetrics;
use crate::providers::PriceProvider;
use crate::types::{ErrorKind, ParsedMetrics, RawResponse};
use serde_json::Value;

#[async_trait]
pub trait Collector: Send + Sync {
    /// Run one fetch, parse and publish cycle. Failures end up in the
    /// instruments, never in the return value.
    async fn collect(&self) -> ParsedMetrics;

    fn validate(&self) -> bool;
}

/// The only writer of [`ExporterMetrics`].
pub struct PriceCollector {
    provider: Option<Arc<dyn PriceProvider>>,
    metrics: Arc<ExporterMetrics>,
}

impl PriceCollector {
    pub fn new(provider: Arc<dyn PriceProvider>, metrics: Arc<ExporterMetrics>) -> Self {
        Self { provider: Some(provider), metrics }
    }

    /// A collector with no provider attached; every cycle is an exception.
    pub fn detached(metrics: Arc<ExporterMetrics>) -> Self {
        Self { provider: None, metrics }
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    async fn cycle(&self) -> Result<ParsedMetrics, &'static str> {
        let provider = self.provider.as_ref().ok_or("no provider attached")?;

        let Some(raw) = provider.fetch_data().await.filter(|raw| !is_blank(raw)) else {
            tracing::warn!("no data received from provider");
            self.metrics.record_error(ErrorKind::NoData);
            return Ok(ParsedMetrics::empty());
        };

        let parsed = provider.parse_response(&raw);
        let Some(price) = parsed.bitcoin_price else {
            tracing::error!("no bitcoin_price in parsed metrics");
            self.metrics.record_error(ErrorKind::ParseError);
            return Ok(ParsedMetrics::empty());
        };

        self.metrics.record_price(provider.name(), price, parsed.last_updated);
        tracing::info!(price, last_updated = ?parsed.last_updated, "collected metrics");
        Ok(parsed)
    }
}

#[async_trait]
impl Collector for PriceCollector {
    async fn collect(&self) -> ParsedMetrics {
        let outcome = AssertUnwindSafe(self.cycle()).catch_unwind().await;
        match outcome {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(reason)) => {
                tracing::error!("failed to collect metrics: {reason}");
                self.metrics.record_error(ErrorKind::Exception);
                ParsedMetrics::empty()
            }
            Err(panic) => {
                tracing::error!("failed to collect metrics: {}", panic_message(panic.as_ref()));
                self.metrics.record_error(ErrorKind::Exception);
                ParsedMetrics::empty()
            }
        }
    }

    fn validate(&self) -> bool {
        match &self.provider {
            Some(p) => p.validate_config(),
            None => {
                tracing::error!("no provider configured");
                false
            }
        }
    }
}

/// `null`, `{}` and `[]` carry nothing to parse.
fn is_blank(raw: &RawResponse) -> bool {
    match raw {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, RetryConfig};
    use crate::providers::build_provider;
    use httpmock::prelude::*;
    use prometheus::Registry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Absent,
        Body(RawResponse, ParsedMetrics),
        Panic,
    }

    struct ScriptedProvider {
        script: Script,
        valid: bool,
        fetches: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self { script, valid: true, fetches: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl PriceProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "coindesk"
        }

        async fn fetch_data(&self) -> Option<RawResponse> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Absent => None,
                Script::Body(raw, _) => Some(raw.clone()),
                Script::Panic => panic!("API error"),
            }
        }

        fn parse_response(&self, _raw: &RawResponse) -> ParsedMetrics {
            match &self.script {
                Script::Body(_, parsed) => *parsed,
                _ => ParsedMetrics::empty(),
            }
        }

        fn validate_config(&self) -> bool {
            self.valid
        }
    }

    fn metrics() -> Arc<ExporterMetrics> {
        Arc::new(ExporterMetrics::register(Registry::new()).unwrap())
    }

    fn priced(px: f64, ts: f64) -> Script {
        Script::Body(json!({ "test": "data" }), ParsedMetrics { bitcoin_price: Some(px), last_updated: Some(ts) })
    }

    #[tokio::test]
    async fn success_sets_price_and_flag() {
        let m = metrics();
        let provider = ScriptedProvider::new(priced(45123.45, 1_234_567_890.0));
        let c = PriceCollector::new(provider.clone(), m.clone());

        let out = c.collect().await;

        assert_eq!(out, ParsedMetrics { bitcoin_price: Some(45123.45), last_updated: Some(1_234_567_890.0) });
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(m.price_value("coindesk"), 45123.45);
        assert_eq!(m.last_updated.get(), 1_234_567_890.0);
        assert_eq!(m.fetch_success.get(), 1.0);
    }

    #[tokio::test]
    async fn absent_fetch_counts_no_data_and_keeps_stale_price() {
        let m = metrics();
        PriceCollector::new(ScriptedProvider::new(priced(100.0, 10.0)), m.clone()).collect().await;

        let out = PriceCollector::new(ScriptedProvider::new(Script::Absent), m.clone()).collect().await;

        assert!(out.is_empty());
        assert_eq!(m.error_count(ErrorKind::NoData), 1);
        assert_eq!(m.fetch_success.get(), 0.0);
        assert_eq!(m.price_value("coindesk"), 100.0);
        assert_eq!(m.last_updated.get(), 10.0);
    }

    #[tokio::test]
    async fn missing_price_counts_parse_error() {
        let m = metrics();
        let script = Script::Body(json!({ "test": "data" }), ParsedMetrics { bitcoin_price: None, last_updated: Some(5.0) });
        let out = PriceCollector::new(ScriptedProvider::new(script), m.clone()).collect().await;

        assert!(out.is_empty());
        assert_eq!(m.error_count(ErrorKind::ParseError), 1);
        assert_eq!(m.error_count(ErrorKind::NoData), 0);
        assert_eq!(m.fetch_success.get(), 0.0);
        assert_eq!(m.last_updated.get(), 0.0);
    }

    #[tokio::test]
    async fn empty_upstream_body_counts_no_data() {
        let server = MockServer::start_async().await;
        for (path, body) in [("/object", json!({})), ("/null", Value::Null), ("/array", json!([]))] {
            server
                .mock_async(|when, then| {
                    when.method(GET).path(path);
                    then.status(200).json_body(body.clone());
                })
                .await;
        }

        for path in ["/object", "/null", "/array"] {
            let m = metrics();
            let api = ApiConfig {
                endpoint: Some(server.url(path)),
                retry: RetryConfig { max_attempts: 1, backoff: 2.0 },
                ..ApiConfig::default()
            };
            let provider = build_provider(&api, reqwest::Client::new()).unwrap();
            let out = PriceCollector::new(provider, m.clone()).collect().await;

            assert!(out.is_empty(), "{path}");
            assert_eq!(m.error_count(ErrorKind::NoData), 1, "{path}");
            assert_eq!(m.error_count(ErrorKind::ParseError), 0, "{path}");
            assert_eq!(m.fetch_success.get(), 0.0, "{path}");
        }
    }

    #[tokio::test]
    async fn provider_panic_counts_exception() {
        let m = metrics();
        let out = PriceCollector::new(ScriptedProvider::new(Script::Panic), m.clone()).collect().await;

        assert!(out.is_empty());
        assert_eq!(m.error_count(ErrorKind::Exception), 1);
        assert_eq!(m.fetch_success.get(), 0.0);
    }

    #[tokio::test]
    async fn detached_collector_counts_exception() {
        let m = metrics();
        let c = PriceCollector::detached(m.clone());
        assert!(c.collect().await.is_empty());
        assert_eq!(m.error_count(ErrorKind::Exception), 1);
    }

    #[test]
    fn validate_delegates_to_provider() {
        let ok = PriceCollector::new(ScriptedProvider::new(Script::Absent), metrics());
        assert!(ok.validate());

        let bad = Arc::new(ScriptedProvider { script: Script::Absent, valid: false, fetches: AtomicUsize::new(0) });
        assert!(!PriceCollector::new(bad, metrics()).validate());

        assert!(!PriceCollector::detached(metrics()).validate());
    }
}
