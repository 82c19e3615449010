// demos/rest_call.rs
use anyhow::{Context, Result};
use rpc_connector_rs::auth::Credentials;
use rpc_connector_rs::config::ClientConfig;
use rpc_connector_rs::rest::Client;
use serde_json::{json, Value};
use std::env;
use tracing::{error, info};

/// Sets up logging with a custom format
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env().context("invalid RPC_CONNECTOR_* configuration")?;
    let credentials = env::var("DEMO_ACCESS_TOKEN").ok().map(Credentials::from_token);
    let client = Client::new(&config, credentials.clone()).context("failed to build client")?;
    info!("Using REST endpoint {}", config.rest_url);

    let instrument = env::var("DEMO_INSTRUMENT").unwrap_or_else(|_| "BTC-PERPETUAL".to_string());
    let ticker: Value = client
        .get(
            "/public/ticker",
            &json!({ "instrument_name": instrument }),
            false,
        )
        .await
        .with_context(|| format!("failed to fetch ticker for {}", instrument))?;
    info!("Ticker: {}", ticker);

    if credentials.is_none() {
        info!("DEMO_ACCESS_TOKEN not set, skipping private calls");
        return Ok(());
    }

    match client
        .get::<_, Value>("/private/get_positions", &json!({ "currency": "BTC" }), true)
        .await
    {
        Ok(positions) => info!("Positions: {}", positions),
        Err(e) => error!("Failed to fetch positions: {}", e),
    }

    Ok(())
}
