// src/config.rs
use serde::Deserialize;
use ::config::{Config, File, FileFormat};
use std::path::PathBuf;
use std::time::Duration;

pub const BASE_FILE: &str = "app-config.toml";
pub const DEFAULT_ENVIRONMENT: &str = "local";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("{var}={value:?} is not a valid {expected}")]
    BadOverride {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid collector configuration")]
    Validation,
    #[error("registering metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Immutable snapshot taken once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)] pub exporter: ServerConfig,
    #[serde(default)] pub api: ApiConfig,
    #[serde(default)] pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]     pub port: u16,
    #[serde(default = "d_interval")] pub interval: u64, // seconds between cycles
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "d_provider")] pub provider: String,
    #[serde(default)]                pub endpoint: Option<String>,
    #[serde(default = "d_timeout")]  pub timeout: u64, // seconds, per request
    #[serde(default)]                pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_attempts")] pub max_attempts: u32,
    #[serde(default = "d_backoff")]      pub backoff: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "d_level")] pub level: String,
}

fn d_port() -> u16 { 8000 }
fn d_interval() -> u64 { 60 }
fn d_provider() -> String { "coindesk".into() }
fn d_timeout() -> u64 { 30 }
fn d_max_attempts() -> u32 { 3 }
fn d_backoff() -> f64 { 2.0 }
fn d_level() -> String { "INFO".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: d_port(), interval: d_interval() }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { provider: d_provider(), endpoint: None, timeout: d_timeout(), retry: RetryConfig::default() }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: d_max_attempts(), backoff: d_backoff() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: d_level() }
    }
}

impl ServerConfig {
    pub fn interval(&self) -> Duration { Duration::from_secs(self.interval) }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout) }
}

impl LoggingConfig {
    /// Level as an `EnvFilter` directive (`INFO` -> `info`, `WARNING` -> `warn`).
    pub fn directive(&self) -> String {
        match self.level.to_ascii_lowercase().as_str() {
            "warning" => "warn".into(),
            "critical" | "fatal" => "error".into(),
            other => other.into(),
        }
    }
}

/// Layers `app-config.toml`, `environments/<env>.toml` and environment
/// variable overrides, in that order.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    environment: String,
}

impl ConfigLoader {
    pub fn new(dir: impl Into<PathBuf>, environment: Option<String>) -> Self {
        let environment = environment
            .or_else(|| std::env::var("ENV").ok())
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        Self { dir: dir.into(), environment }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn load(&self) -> Result<ExporterConfig, ConfigError> {
        self.load_with(|var| std::env::var(var).ok())
    }

    /// Same as [`load`](Self::load) with an injectable variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<ExporterConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = self.dir.join(BASE_FILE);
        if !base.is_file() {
            tracing::warn!(dir = %self.dir.display(), "{BASE_FILE} not found, using defaults");
        }
        let overlay = self.dir.join("environments").join(format!("{}.toml", self.environment));

        let port = match lookup("EXPORTER_PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| ConfigError::BadOverride {
                var: "EXPORTER_PORT",
                value: raw.clone(),
                expected: "port number",
            })?),
            None => None,
        };

        let cfg = Config::builder()
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Toml).required(false))
            .set_override_option("exporter.port", port.map(i64::from))?
            .set_override_option("logging.level", lookup("LOG_LEVEL"))?
            .set_override_option("api.endpoint", lookup("API_ENDPOINT"))?
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn seeded_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            BASE_FILE,
            r#"
            [exporter]
            port = 8000
            interval = 60

            [api]
            provider = "coindesk"
            timeout = 10
            "#,
        );
        write(
            dir.path(),
            "environments/local.toml",
            r#"
            [exporter]
            port = 8001

            [logging]
            level = "DEBUG"
            "#,
        );
        dir
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn overlay_takes_precedence_over_base() {
        let dir = seeded_dir();
        let cfg = ConfigLoader::new(dir.path(), Some("local".into())).load_with(no_env).unwrap();
        assert_eq!(cfg.exporter.port, 8001);
        assert_eq!(cfg.exporter.interval, 60);
        assert_eq!(cfg.logging.level, "DEBUG");
        assert_eq!(cfg.api.timeout, 10);
        assert_eq!(cfg.api.retry.max_attempts, 3);
    }

    #[test]
    fn selected_environment_file_is_used() {
        let dir = seeded_dir();
        write(dir.path(), "environments/production.toml", "[exporter]\nport = 8080\n");
        let loader = ConfigLoader::new(dir.path(), Some("production".into()));
        let cfg = loader.load_with(no_env).unwrap();
        assert_eq!(loader.environment(), "production");
        assert_eq!(cfg.exporter.port, 8080);
        assert_eq!(cfg.logging.level, "INFO");
    }

    #[test]
    fn env_vars_override_files() {
        let dir = seeded_dir();
        let vars: HashMap<&str, &str> = [
            ("EXPORTER_PORT", "9000"),
            ("LOG_LEVEL", "ERROR"),
            ("API_ENDPOINT", "https://custom.api.com"),
        ]
        .into_iter()
        .collect();
        let cfg = ConfigLoader::new(dir.path(), Some("local".into()))
            .load_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.exporter.port, 9000);
        assert_eq!(cfg.logging.level, "ERROR");
        assert_eq!(cfg.api.endpoint.as_deref(), Some("https://custom.api.com"));
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let dir = seeded_dir();
        let err = ConfigLoader::new(dir.path(), Some("local".into()))
            .load_with(|k| (k == "EXPORTER_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadOverride { var: "EXPORTER_PORT", .. }));
    }

    #[test]
    fn missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigLoader::new(dir.path().join("nope"), Some("local".into()))
            .load_with(no_env)
            .unwrap();
        assert_eq!(cfg.exporter.port, 8000);
        assert_eq!(cfg.exporter.interval(), Duration::from_secs(60));
        assert_eq!(cfg.api.provider, "coindesk");
        assert!(cfg.api.endpoint.is_none());
        assert_eq!(cfg.api.retry.backoff, 2.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), BASE_FILE, "[exporter\nport = ");
        let err = ConfigLoader::new(dir.path(), Some("local".into())).load_with(no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn overlay_merges_nested_tables() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            BASE_FILE,
            r#"
            [api]
            provider = "coingecko"
            timeout = 10

            [api.retry]
            max_attempts = 4
            backoff = 2.0
            "#,
        );
        write(dir.path(), "environments/staging.toml", "[api.retry]\nbackoff = 3.0\n");

        let cfg = ConfigLoader::new(dir.path(), Some("staging".into())).load_with(no_env).unwrap();
        assert_eq!(cfg.api.provider, "coingecko");
        assert_eq!(cfg.api.timeout, 10);
        assert_eq!(cfg.api.retry.max_attempts, 4);
        assert_eq!(cfg.api.retry.backoff, 3.0);
    }

    #[test]
    fn level_directive_accepts_uppercase_aliases() {
        let lvl = |s: &str| LoggingConfig { level: s.into() }.directive();
        assert_eq!(lvl("INFO"), "info");
        assert_eq!(lvl("WARNING"), "warn");
        assert_eq!(lvl("CRITICAL"), "error");
    }
}
