use crate::clock;
use crate::server::ServerState;
use axum::extract::State;
use axum::{response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Health probe response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    sessions: usize,
    timestamp: u64,
}

/// # Errors
///
/// Returns an error if binding the health HTTP server fails.
pub async fn start_health_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("health endpoint listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health probe handler - reports liveness and the live session count.
async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        sessions: state.registry.len(),
        timestamp: clock::now_ms(),
    })
}

/// Connection and session gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("rally_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("rally_connections_active").decrement(1.0);
    }

    /// Increment the active sessions gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("rally_sessions_active").increment(1.0);
    }

    /// Decrement the active sessions gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("rally_sessions_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the created-sessions counter.
    pub fn sessions_created() {
        metrics::counter!("rally_sessions_created_total").increment(1);
    }

    /// Record a session termination with the given reason label.
    pub fn sessions_terminated(reason: &'static str) {
        metrics::counter!("rally_sessions_terminated_total", "reason" => reason).increment(1);
    }

    /// Count a frame in the given direction.
    pub fn frames(direction: &'static str) {
        metrics::counter!("rally_frames_total", "direction" => direction).increment(1);
    }

    /// Count a dropped inbound message with the given reason label.
    pub fn messages_dropped(reason: &'static str) {
        metrics::counter!("rally_messages_dropped_total", "reason" => reason).increment(1);
    }
}
