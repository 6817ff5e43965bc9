//! Player Ingest Server
//!
//! Starts the UDP and WebSocket RPC listeners and logs every accepted update.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use player_ingest::{LogSink, ServerConfig, ServerGroup, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Player Ingest v{}", VERSION);

    let config = ServerConfig::from_env();
    info!("UDP address: {}", config.udp_addr);
    info!("RPC address: {}", config.rpc_addr);

    let group = ServerGroup::bind(&config, Arc::new(LogSink))
        .await
        .context("failed to start listeners")?;

    let handle = group.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                handle.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    group.run().await.context("listener failed")?;
    info!("Shutdown complete");
    Ok(())
}
