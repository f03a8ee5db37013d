//! Protocol command handlers.
//!
//! Each inbound envelope is dispatched by its tag to a handler that checks
//! the connection's binding, mutates the session under its guard, and emits
//! zero or more directed frames. Handlers never suspend between sanitizing
//! and mutating; all sends are non-blocking.

use crate::clock;
use crate::metrics::{counters, gauges};
use crate::mint;
use crate::sanitize;
use crate::server::ServerState;
use crate::session::{ClientPeer, PeerSender, Session};
use rally_common::blob;
use rally_common::types::close_code;
use rally_common::wire::{
    ChatMessage, InboundEnvelope, ReadyPayload, Role, ServerEvent,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Which session, participant and role a connection is bound to.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Canonical session code.
    pub code: String,
    /// Participant id within the session.
    pub participant_id: String,
    /// Role granted at bind time.
    pub role: Role,
}

/// Per-connection dispatch context: the connection's own sender plus its
/// current binding, if any.
#[derive(Debug)]
pub struct ConnCtx {
    /// Sender feeding this connection's writer task.
    pub sender: PeerSender,
    /// Set once the transport is bound by init, resume or join.
    pub binding: Option<Binding>,
}

impl ConnCtx {
    /// Context for a freshly accepted, unbound transport.
    #[must_use]
    pub fn new(sender: PeerSender) -> Self {
        Self {
            sender,
            binding: None,
        }
    }

    fn send(&self, state: &ServerState, event: &ServerEvent) {
        self.sender.send(&state.meter, event);
    }

    fn error(&self, state: &ServerState, message: impl Into<String>) {
        self.send(
            state,
            &ServerEvent::Error {
                message: message.into(),
            },
        );
    }
}

/// Dispatch one decoded inbound envelope from a connection.
pub async fn dispatch(state: &Arc<ServerState>, ctx: &mut ConnCtx, envelope: InboundEnvelope) {
    match envelope.kind.as_str() {
        "host:init" => host_init(state, ctx).await,
        "host:resume" => host_resume(state, ctx, &envelope.payload).await,
        "client:join" => client_join(state, ctx, &envelope.payload).await,
        "participant:location" => location(state, ctx, &envelope.payload).await,
        "host:state" => host_state(state, ctx, &envelope.payload).await,
        "host:interval" => host_interval(state, ctx, &envelope.payload).await,
        "client:routes" => client_routes(state, ctx, &envelope.payload).await,
        "participant:message" => message(state, ctx, &envelope.payload).await,
        "participant:heartbeat" => heartbeat(state, ctx).await,
        "host:shutdown" => host_shutdown(state, ctx).await,
        other => {
            debug!(kind = other, "unknown message type");
            ctx.error(state, format!("Unknown message type: {other}"));
        }
    }
}

/// Terminate a session: announce, close every transport, drop the record.
pub async fn terminate_session(state: &Arc<ServerState>, code: &str, reason: &'static str) {
    let Some(handle) = state.registry.remove(code) else {
        return;
    };
    let session = handle.lock().await;
    let event = ServerEvent::Ended {
        reason: reason.to_string(),
        timestamp: clock::now_ms(),
    };
    session.send_to_all(&state.meter, &event, None);
    for client in session.clients.values() {
        client.sender.close(close_code::CLIENT, reason);
    }
    if let Some(sender) = &session.host.sender {
        sender.close(close_code::HOST, reason);
    }
    counters::sessions_terminated(reason);
    gauges::dec_sessions_active();
    info!(code, reason, "session terminated");
}

fn session_id_of(payload: &Value) -> Option<String> {
    let raw = payload.get("sessionId")?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.to_uppercase())
}

async fn host_init(state: &Arc<ServerState>, ctx: &mut ConnCtx) {
    if ctx.binding.is_some() {
        return ctx.error(state, "Already bound to a session.");
    }

    let host_id = mint::host_participant_id();
    let resume_token = mint::resume_token();
    let interval_ms = state.config.location_interval_ms;
    let now = clock::now_ms();

    let (code, _handle) = state.registry.create_with(state.config.code_length, |code| {
        let mut session = Session::new(
            code,
            host_id.clone(),
            resume_token.clone(),
            interval_ms,
            now,
        );
        session.host.sender = Some(ctx.sender.clone());
        session
    });

    ctx.binding = Some(Binding {
        code: code.clone(),
        participant_id: host_id.clone(),
        role: Role::Host,
    });
    counters::sessions_created();
    gauges::inc_sessions_active();
    info!(code = %code, "session created");

    ctx.send(
        state,
        &ServerEvent::Ready(ReadyPayload {
            session_id: code,
            role: Role::Host,
            participant_id: host_id,
            peers: Vec::new(),
            state: None,
            interval_ms,
            resume_token: Some(resume_token),
        }),
    );
}

async fn host_resume(state: &Arc<ServerState>, ctx: &mut ConnCtx, payload: &Value) {
    if ctx.binding.is_some() {
        return ctx.error(state, "Already bound to a session.");
    }
    let Some(code) = session_id_of(payload) else {
        return ctx.error(state, "Session code is required.");
    };
    let Some(handle) = state.registry.get(&code) else {
        return ctx.error(state, "Session not found.");
    };
    let presented = payload
        .get("resumeToken")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut session = handle.lock().await;
    if session.host.sender.is_some() {
        return ctx.error(state, "Host is already connected.");
    }
    if presented.is_empty() || presented != session.resume_token {
        return ctx.error(state, "Invalid resume token.");
    }

    let rotated = mint::resume_token();
    let now = clock::now_ms();
    session.attach_host(ctx.sender.clone(), rotated.clone(), now);
    ctx.binding = Some(Binding {
        code: code.clone(),
        participant_id: session.host.id.clone(),
        role: Role::Host,
    });
    info!(code = %code, "host resumed");

    ctx.send(
        state,
        &ServerEvent::Ready(ReadyPayload {
            session_id: code,
            role: Role::Host,
            participant_id: session.host.id.clone(),
            peers: session.peer_infos(),
            state: session.state_snapshot(),
            interval_ms: session.interval_ms,
            resume_token: Some(rotated),
        }),
    );
    session.send_to_clients(
        &state.meter,
        &ServerEvent::HostStatus {
            online: true,
            reason: "host-resumed".to_string(),
            timestamp: now,
        },
        None,
    );
}

async fn client_join(state: &Arc<ServerState>, ctx: &mut ConnCtx, payload: &Value) {
    if ctx.binding.is_some() {
        return ctx.error(state, "Already bound to a session.");
    }
    let Some(code) = session_id_of(payload) else {
        return ctx.error(state, "Session code is required.");
    };
    let Some(handle) = state.registry.get(&code) else {
        return ctx.error(state, "Session not found.");
    };

    let mut session = handle.lock().await;
    let participant_id = loop {
        let id = mint::client_participant_id();
        if id != session.host.id && !session.clients.contains_key(&id) {
            break id;
        }
    };
    let label = sanitize::display_name(payload).unwrap_or_else(|| participant_id.clone());
    let color = session.next_color();

    let peer = ClientPeer {
        id: participant_id.clone(),
        label,
        color,
        sender: ctx.sender.clone(),
        last_location_at: None,
        last_location: None,
        routes: None,
        routes_hash: None,
    };
    let info = peer.info();
    session.clients.insert(participant_id.clone(), peer);
    ctx.binding = Some(Binding {
        code: code.clone(),
        participant_id: participant_id.clone(),
        role: Role::Client,
    });
    debug!(code = %code, participant = %participant_id, "client joined");

    ctx.send(
        state,
        &ServerEvent::Ready(ReadyPayload {
            session_id: code,
            role: Role::Client,
            participant_id,
            peers: Vec::new(),
            state: None,
            interval_ms: session.interval_ms,
            resume_token: None,
        }),
    );
    session.send_to_host(&state.meter, &ServerEvent::PeerJoined(info));
}

async fn location(state: &Arc<ServerState>, ctx: &ConnCtx, payload: &Value) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };

    let mut session = handle.lock().await;
    let now = clock::now_ms();
    let interval_ms = session.interval_ms;

    let last = match binding.role {
        Role::Host => session.host.last_location_at,
        _ => session
            .clients
            .get(&binding.participant_id)
            .and_then(|peer| peer.last_location_at),
    };
    if last.is_some_and(|at| now.saturating_sub(at) < interval_ms) {
        counters::messages_dropped("throttled");
        return;
    }

    let Some(fix) = sanitize::location(payload, now) else {
        counters::messages_dropped("invalid");
        return;
    };

    match binding.role {
        Role::Host => {
            session.host.last_location_at = Some(now);
            session.host.last_location = Some(fix);
            session.touch(now);
        }
        _ => {
            let Some(peer) = session.clients.get_mut(&binding.participant_id) else {
                return;
            };
            peer.last_location_at = Some(now);
            peer.last_location = Some(fix.clone());
            session.touch(now);
            session.send_to_host(
                &state.meter,
                &ServerEvent::Location {
                    participant_id: binding.participant_id.clone(),
                    location: fix,
                },
            );
        }
    }
}

async fn host_state(state: &Arc<ServerState>, ctx: &ConnCtx, payload: &Value) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    if binding.role != Role::Host {
        return ctx.error(state, "Only the host can publish state.");
    }
    let Some(data) = payload.get("data").and_then(Value::as_str).filter(|s| !s.is_empty())
    else {
        return ctx.error(state, "State payload must be a non-empty string.");
    };
    if let Err(e) = blob::unpack(data) {
        debug!(code = %binding.code, error = %e, "rejected state blob");
        return ctx.error(state, "State payload is not a valid compressed document.");
    }
    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };

    let hash = blob::content_hash(data.as_bytes());
    let mut session = handle.lock().await;
    if session.state_hash.as_deref() == Some(hash.as_str()) {
        return;
    }
    session.replace_state(data.to_string(), hash);
    let snapshot = session
        .state_snapshot()
        .map(ServerEvent::State);
    if let Some(event) = snapshot {
        session.send_to_host(&state.meter, &event);
    }
}

async fn host_interval(state: &Arc<ServerState>, ctx: &ConnCtx, payload: &Value) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    if binding.role != Role::Host {
        return ctx.error(state, "Only the host can change the interval.");
    }

    let requested_ms = payload
        .get("intervalMs")
        .and_then(sanitize::as_finite_f64)
        .or_else(|| {
            payload
                .get("seconds")
                .and_then(sanitize::as_finite_f64)
                .map(|s| s * 1000.0)
        });
    let Some(requested_ms) = requested_ms else {
        return ctx.error(state, "Invalid interval value.");
    };
    let interval_ms = (requested_ms.round() as i64).clamp(
        rally_common::types::MIN_INTERVAL_MS as i64,
        rally_common::types::MAX_INTERVAL_MS as i64,
    ) as u64;

    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };
    let mut session = handle.lock().await;
    if session.interval_ms == interval_ms {
        return;
    }
    session.interval_ms = interval_ms;
    info!(code = %binding.code, interval_ms, "interval changed");
    session.send_to_all(&state.meter, &ServerEvent::Interval { interval_ms }, None);
}

async fn client_routes(state: &Arc<ServerState>, ctx: &ConnCtx, payload: &Value) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    if binding.role != Role::Client {
        return ctx.error(state, "Only clients can upload routes.");
    }
    let Some(routes) = sanitize::routes(
        payload.get("routes").unwrap_or(&Value::Null),
        state.config.max_client_routes,
        state.config.max_route_points,
    ) else {
        return ctx.error(state, "Routes payload must be a list.");
    };
    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };

    let hash = sanitize::routes_hash(&routes);
    let mut session = handle.lock().await;
    let now = clock::now_ms();
    {
        let Some(peer) = session.clients.get_mut(&binding.participant_id) else {
            return ctx.error(state, "Not joined to a session.");
        };
        if peer.routes_hash.as_deref() == Some(hash.as_str()) {
            return;
        }
        peer.routes = if routes.is_empty() {
            None
        } else {
            Some(routes.clone())
        };
        peer.routes_hash = Some(hash);
    }
    session.touch(now);
    session.send_to_host(
        &state.meter,
        &ServerEvent::PeerRoutes {
            participant_id: binding.participant_id.clone(),
            routes,
        },
    );
}

async fn message(state: &Arc<ServerState>, ctx: &ConnCtx, payload: &Value) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    let text = payload
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return;
    }
    let now = clock::now_ms();

    if text.starts_with("/data") {
        let window = text.split_whitespace().nth(1).and_then(|w| w.parse().ok());
        let report = traffic_report(state, window);
        ctx.send(
            state,
            &ServerEvent::Message(ChatMessage {
                participant_id: "server".to_string(),
                label: "Server".to_string(),
                role: Role::System,
                text: report,
                timestamp: now,
            }),
        );
        return;
    }

    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };
    let session = handle.lock().await;
    let label = match binding.role {
        Role::Host => session.host.label.clone(),
        _ => match session.clients.get(&binding.participant_id) {
            Some(peer) => peer.label.clone(),
            None => return ctx.error(state, "Not joined to a session."),
        },
    };
    session.send_to_all(
        &state.meter,
        &ServerEvent::Message(ChatMessage {
            participant_id: binding.participant_id.clone(),
            label,
            role: binding.role,
            text: text.to_string(),
            timestamp: now,
        }),
        None,
    );
}

fn traffic_report(state: &ServerState, window_secs: Option<u64>) -> String {
    let kb = |bytes: u64| bytes as f64 / 1024.0;
    let summary = state.meter.summarize(window_secs);
    let mut report = format!(
        "Total: {:.1} KB in / {:.1} KB out since start.",
        kb(summary.total_in),
        kb(summary.total_out)
    );
    if let Some(window) = summary.window {
        let total = kb(window.in_bytes.saturating_add(window.out_bytes));
        let rate = if window.seconds == 0 {
            0.0
        } else {
            total / window.seconds as f64
        };
        report.push_str(&format!(
            " Last {}s: {:.1} KB ({:.2} KB/s).",
            window.seconds, total, rate
        ));
    }
    report
}

async fn heartbeat(state: &Arc<ServerState>, ctx: &ConnCtx) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    let Some(handle) = state.registry.get(&binding.code) else {
        return ctx.error(state, "Session not found.");
    };
    let now = clock::now_ms();
    handle.lock().await.touch(now);
    ctx.send(state, &ServerEvent::Heartbeat { timestamp: now });
}

async fn host_shutdown(state: &Arc<ServerState>, ctx: &ConnCtx) {
    let Some(binding) = &ctx.binding else {
        return ctx.error(state, "Not joined to a session.");
    };
    if binding.role != Role::Host {
        return ctx.error(state, "Only the host can end the session.");
    }
    terminate_session(state, &binding.code, "host-ended").await;
}
