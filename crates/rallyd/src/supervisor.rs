//! Periodic session-expiry sweep.

use crate::clock;
use crate::dispatch;
use crate::server::ServerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

/// Floor on the sweep cadence.
const MIN_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Run the expiry sweep at half the session TTL (floored at one minute)
/// until the task is aborted on shutdown.
pub async fn run_expiry_sweep(state: Arc<ServerState>) {
    let period = (state.config.session_ttl_ms / 2).max(MIN_SWEEP_INTERVAL_MS);
    let mut ticker = interval(Duration::from_millis(period));
    // The first tick fires immediately; skip it so a fresh server does not
    // sweep before anything could expire.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

/// One sweep pass: terminate sessions whose host never returned within the
/// grace window, then sessions idle past the TTL.
pub async fn sweep_once(state: &Arc<ServerState>) {
    let now = clock::now_ms();
    for code in state.registry.codes() {
        let Some(handle) = state.registry.get(&code) else {
            continue;
        };
        let reason = {
            let session = handle.lock().await;
            if session
                .host_detached_at
                .is_some_and(|at| now.saturating_sub(at) > state.config.host_resume_grace_ms)
            {
                Some("host-timeout")
            } else if now.saturating_sub(session.last_activity) > state.config.session_ttl_ms {
                Some("session-expired")
            } else {
                None
            }
        };
        if let Some(reason) = reason {
            debug!(code = %code, reason, "sweeping session");
            dispatch::terminate_session(state, &code, reason).await;
        }
    }
}
