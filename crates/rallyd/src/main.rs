#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use rallyd::config::{Args, ServerConfig};
use rallyd::metrics::start_health_server;
use rallyd::registry::Registry;
use rallyd::server::ServerState;
use rallyd::traffic::TrafficMeter;
use rallyd::{run, supervisor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let state = Arc::new(ServerState {
        registry: Registry::new(),
        meter: TrafficMeter::new(config.traffic_window_secs),
        config: config.clone(),
    });

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = start_health_server(config.health_addr, state).await {
                tracing::warn!("health server error: {}", e);
            }
        }
    });

    let sweep = tokio::spawn(supervisor::run_expiry_sweep(Arc::clone(&state)));

    tokio::select! {
        result = run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    sweep.abort();
    Ok(())
}
