// src/bin/price_exporter.rs
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use price_exporter::config::ConfigLoader;
use price_exporter::exporter::{spawn_signal_listener, Exporter};

#[derive(Debug, Parser)]
#[command(name = "price_exporter", about = "Serve the BTC spot price as Prometheus metrics")]
struct Args {
    /// Directory holding app-config.toml and environments/
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Overlay to apply from environments/<name>.toml (defaults to $ENV, then "local")
    #[arg(long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let cfg = ConfigLoader::new(&args.config_dir, args.environment).load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cfg.logging.directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let exporter = match Exporter::initialize(cfg) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("failed to initialize exporter: {e}");
            std::process::exit(1);
        }
    };

    spawn_signal_listener(exporter.lifecycle());
    let listener = exporter.bind().await?;
    exporter.run(listener).await
}
