use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RelayError;
use crate::registry::Registry;
use crate::traffic::TrafficMeter;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared state for the relay server.
pub struct ServerState {
    /// Live session registry.
    pub registry: Registry,
    /// Process-global traffic meter.
    pub meter: TrafficMeter,
    /// Runtime server configuration.
    pub config: ServerConfig,
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::Io)?;
    info!("relay listening on {}", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, state).await {
                        tracing::debug!("connection from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
