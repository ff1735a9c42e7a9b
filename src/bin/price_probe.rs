// src/bin/price_probe.rs
use price_exporter::config::ApiConfig;
use price_exporter::providers::build_provider;

/// Fetch once from the given provider and print what the exporter would publish.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut api = ApiConfig::default();
    if let Some(name) = std::env::args().nth(1) {
        api.provider = name;
    }
    api.endpoint = std::env::args().nth(2).or_else(|| std::env::var("API_ENDPOINT").ok());

    let provider = build_provider(&api, reqwest::Client::new())?;
    anyhow::ensure!(provider.validate_config(), "no endpoint configured");

    let raw = provider
        .fetch_data()
        .await
        .ok_or_else(|| anyhow::anyhow!("no data received from {}", provider.name()))?;
    let parsed = provider.parse_response(&raw);
    println!("{} -> {}", provider.name(), serde_json::to_string(&parsed)?);
    Ok(())
}
