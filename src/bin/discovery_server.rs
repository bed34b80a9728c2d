//! Standalone discovery server.

use anyhow::Result;
use dotenv::dotenv;
use log::info;
use peerlink::config::DEFAULT_SERVER_PORT;
use peerlink::DiscoveryServer;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let port = env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .or_else(|| {
            env::var("PEERLINK_SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
        })
        .unwrap_or(DEFAULT_SERVER_PORT);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut server = DiscoveryServer::new();
    let addr = server.start(port).await?;
    info!("Discovery server running on {} (Press Ctrl+C to stop)", addr);

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    server.stop().await;
    info!("Server stopped");
    Ok(())
}
