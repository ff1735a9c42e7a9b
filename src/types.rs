// src/types.rs
use serde::Serialize;

/// Upstream payload exactly as decoded from the response body.
pub type RawResponse = serde_json::Value;

/// Flat metric set produced by one parse. Built fresh every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ParsedMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitcoin_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>, // unix seconds
}

impl ParsedMetrics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bitcoin_price.is_none() && self.last_updated.is_none()
    }
}

/// Label values of `bitcoin_price_errors_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoData,
    ParseError,
    Exception,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 3] = [ErrorKind::NoData, ErrorKind::ParseError, ErrorKind::Exception];

    pub fn as_label(self) -> &'static str {
        match self {
            ErrorKind::NoData => "no_data",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Exception => "exception",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Wall clock as fractional unix seconds.
#[inline]
pub fn now_unix_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
