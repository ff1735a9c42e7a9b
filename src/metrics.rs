// src/metrics.rs
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::types::ErrorKind;

pub const PRICE_CURRENCY: &str = "BTC";

/// Exported instruments. Each one is internally synchronised, so the polling
/// loop writes and scrapes read without any extra locking.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    pub price: GaugeVec,            // currency, source
    pub last_updated: Gauge,
    pub errors: IntCounterVec,      // error_type = no_data|parse_error|exception
    pub fetch_success: Gauge,       // 1 ok, 0 failed
}

impl ExporterMetrics {
    /// Create the instruments and register them on `registry`.
    pub fn register(registry: Registry) -> Result<Self, prometheus::Error> {
        let price = GaugeVec::new(Opts::new("bitcoin_price", "Bitcoin price in USD"), &["currency", "source"])?;
        let last_updated = Gauge::new("bitcoin_price_last_updated", "Timestamp of last price update")?;
        let errors = IntCounterVec::new(
            Opts::new("bitcoin_price_errors_total", "Total number of errors fetching Bitcoin price"),
            &["error_type"],
        )?;
        let fetch_success = Gauge::new(
            "bitcoin_price_fetch_success",
            "Whether the last fetch was successful (1=success, 0=failure)",
        )?;

        registry.register(Box::new(price.clone()))?;
        registry.register(Box::new(last_updated.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(fetch_success.clone()))?;

        Ok(Self { registry, price, last_updated, errors, fetch_success })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.errors.with_label_values(&[kind.as_label()]).inc();
        self.fetch_success.set(0.0);
    }

    pub fn record_price(&self, source: &str, price: f64, last_updated: Option<f64>) {
        self.price.with_label_values(&[PRICE_CURRENCY, source]).set(price);
        if let Some(ts) = last_updated {
            self.last_updated.set(ts);
        }
        self.fetch_success.set(1.0);
    }

    /// Text exposition of everything on the registry.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
impl ExporterMetrics {
    pub(crate) fn error_count(&self, kind: ErrorKind) -> u64 {
        self.errors.with_label_values(&[kind.as_label()]).get()
    }

    pub(crate) fn price_value(&self, source: &str) -> f64 {
        self.price.with_label_values(&[PRICE_CURRENCY, source]).get()
    }
}

pub fn content_type() -> &'static str {
    prometheus::TEXT_FORMAT
}
