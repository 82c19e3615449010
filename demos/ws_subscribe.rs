// demos/ws_subscribe.rs
use rpc_connector_rs::auth::Credentials;
use rpc_connector_rs::config::ClientConfig;
use rpc_connector_rs::websocket::{ChannelHandler, RpcClient};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use tokio::time::{sleep, Duration};

#[derive(Debug, Deserialize)]
struct Ticker {
    instrument_name: String,
    last_price: Option<f64>,
    mark_price: Option<f64>,
}

#[tokio::main]
async fn main() {
    // Initialize logging (optional)
    env_logger::init();

    // Optional: Load .env file if you have one
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env().expect("Invalid RPC_CONNECTOR_* configuration");
    let instrument = env::var("DEMO_INSTRUMENT").unwrap_or_else(|_| "BTC-PERPETUAL".to_string());
    let credentials = env::var("DEMO_ACCESS_TOKEN").ok().map(|token| {
        let credentials = Credentials::from_token(token);
        match env::var("DEMO_ACCOUNT_ID") {
            Ok(account) => credentials.with_account(account),
            Err(_) => credentials,
        }
    });

    println!("Connecting to {}...", config.ws_url);
    let client = match RpcClient::connect(config, credentials.clone()).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            return;
        }
    };

    match client.call::<_, Value>("public/get_time", json!({})).await {
        Ok(time) => println!("[{}] Server time: {}", chrono::Local::now(), time),
        Err(e) => eprintln!("Error fetching server time: {}", e),
    }

    let channel = format!("ticker.{}.100ms", instrument);
    let handler = ChannelHandler::typed(|ticker: Ticker| {
        println!(
            "[{}] {} last={:?} mark={:?}",
            chrono::Local::now(),
            ticker.instrument_name,
            ticker.last_price,
            ticker.mark_price
        );
    });
    if let Err(e) = client.subscribe(&channel, handler).await {
        eprintln!("Error subscribing to {}: {}", channel, e);
    }

    if credentials.is_some() {
        let orders = "account.orders";
        let handler = ChannelHandler::value(|update| {
            println!("[{}] Order update: {}", chrono::Local::now(), update);
        });
        if let Err(e) = client.subscribe(orders, handler).await {
            eprintln!("Error subscribing to {}: {}", orders, e);
        }
    }

    // Keep the connection alive for a while
    println!("Listening for messages for 30 seconds...");
    sleep(Duration::from_secs(30)).await;

    println!("Unsubscribing...");
    if let Err(e) = client.unsubscribe(&channel).await {
        eprintln!("Error unsubscribing from {}: {}", channel, e);
    }

    println!("Stopping client...");
    client.close().await;

    println!("Demo finished.");
}
