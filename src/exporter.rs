// src/exporter.rs
use futures::FutureExt;
use prometheus::Registry;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::collector::{panic_message, Collector, PriceCollector};
use crate::config::{ConfigError, ExporterConfig};
use crate::metrics::ExporterMetrics;
use crate::providers::build_provider;
use crate::server::{self, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl ExporterState {
    pub fn is_stopping(self) -> bool {
        matches!(self, ExporterState::ShuttingDown | ExporterState::Stopped)
    }
}

/// Shared view of the exporter state. Cloned into the server, the signal
/// listener and the polling loop.
#[derive(Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<ExporterState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ExporterState::Initializing);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ExporterState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: ExporterState) {
        self.tx.send_replace(state);
    }

    /// Move to `ShuttingDown` unless already past it.
    pub fn shutdown(&self) {
        self.tx.send_if_modified(|s| {
            if s.is_stopping() {
                return false;
            }
            *s = ExporterState::ShuttingDown;
            true
        });
    }

    /// Resolves once shutdown has been requested.
    pub async fn stopping(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| s.is_stopping()).await;
    }
}

pub struct Exporter {
    cfg: ExporterConfig,
    metrics: Arc<ExporterMetrics>,
    collector: Arc<dyn Collector>,
    lifecycle: Lifecycle,
}

impl Exporter {
    /// Build registry, provider and collector, then validate. Any error here
    /// is fatal for the process.
    pub fn initialize(cfg: ExporterConfig) -> Result<Self, ConfigError> {
        let metrics = Arc::new(ExporterMetrics::register(Registry::new())?);
        let provider = build_provider(&cfg.api, reqwest::Client::new())?;
        let collector = PriceCollector::new(provider, metrics.clone());
        if !collector.validate() {
            return Err(ConfigError::Validation);
        }
        tracing::info!(provider = %cfg.api.provider, "price exporter initialized");
        Ok(Self { cfg, metrics, collector: Arc::new(collector), lifecycle: Lifecycle::new() })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(("0.0.0.0", self.cfg.exporter.port)).await
    }

    /// Serve `/metrics` and `/health` on `listener` and poll until shutdown
    /// is requested through [`Lifecycle::shutdown`].
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        self.lifecycle.set(ExporterState::Running);

        let app = server::router(AppState {
            metrics: self.metrics.clone(),
            lifecycle: self.lifecycle.clone(),
            collector_active: true,
        });
        let drain = self.lifecycle.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { drain.stopping().await })
                .await
        });
        tracing::info!(%addr, "metrics server started");
        tracing::info!("health check available at http://{addr}/health");

        self.poll().await;

        self.lifecycle.shutdown();
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("metrics server failed: {e}"),
            Err(e) => tracing::error!("metrics server task failed: {e}"),
        }
        self.lifecycle.set(ExporterState::Stopped);
        tracing::info!("exporter stopped");
        Ok(())
    }

    /// One immediate cycle, then one per interval. Cycles never overlap.
    async fn poll(&self) {
        let interval = self.cfg.exporter.interval();
        run_cycle(self.collector.as_ref()).await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.lifecycle.stopping() => break,
            }
            if self.lifecycle.state().is_stopping() {
                break;
            }
            run_cycle(self.collector.as_ref()).await;
        }
    }
}

async fn run_cycle(collector: &dyn Collector) {
    if let Err(panic) = AssertUnwindSafe(collector.collect()).catch_unwind().await {
        tracing::error!("error during collection: {}", panic_message(panic.as_ref()));
    }
}

/// Flip `lifecycle` to `ShuttingDown` on SIGINT or SIGTERM.
pub fn spawn_signal_listener(lifecycle: Lifecycle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping exporter...");
        lifecycle.shutdown();
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("installing SIGINT handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!("installing SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
