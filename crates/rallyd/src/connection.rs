use crate::clock;
use crate::dispatch::{self, ConnCtx};
use crate::error::RelayError;
use crate::metrics::{counters, gauges};
use crate::server::ServerState;
use crate::session::PeerSender;
use crate::traffic::Direction;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rally_common::wire::{InboundEnvelope, Role, ServerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Upper bound on a single frame; state blobs are the largest payloads.
const MAX_FRAME_BYTES: usize = 262_144;

/// Depth of the per-connection delivery channel.
const DELIVERY_BUFFER: usize = 256;

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_FRAME_BYTES),
        max_frame_size: Some(MAX_FRAME_BYTES),
        ..WebSocketConfig::default()
    };
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(RelayError::WebSocket)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<Message>(DELIVERY_BUFFER);
    let mut ctx = ConnCtx::new(PeerSender::new(deliver_tx));

    gauges::inc_connections_active();
    debug!(%peer_addr, "connection open");

    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut deliver_rx, &state, &mut ctx).await;

    gauges::dec_connections_active();
    drop_participant(&state, &ctx).await;
    result
}

/// Drive the select loop: inbound frames, directed deliveries, liveness.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Message>,
    state: &Arc<ServerState>,
    ctx: &mut ConnCtx,
) -> Result<(), RelayError> {
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval_secs));
    let mut alive = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.meter.record(Direction::In, text.len() as u64);
                        counters::frames("in");
                        match InboundEnvelope::decode(&text) {
                            Ok(envelope) => dispatch::dispatch(state, ctx, envelope).await,
                            Err(e) => {
                                debug!("undecodable frame: {e}");
                                ctx.sender.send(
                                    &state.meter,
                                    &ServerEvent::Error {
                                        message: "Invalid JSON payload.".to_string(),
                                    },
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {e}");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        alive = true;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {
                        debug!("ignoring non-text frame");
                    }
                    Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                }
            }
            Some(msg) = deliver_rx.recv() => {
                counters::frames("out");
                let closing = matches!(msg, Message::Close(_));
                ws_tx.send(msg).await.map_err(RelayError::WebSocket)?;
                if closing {
                    return Ok(());
                }
            }
            _ = ping_interval.tick() => {
                if !alive {
                    debug!("liveness probe failed, dropping transport");
                    return Ok(());
                }
                alive = false;
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    debug!("failed to send ping: {e}");
                }
            }
        }
    }
}

/// Unbind a closed transport from its session: detach hosts, remove clients.
async fn drop_participant(state: &Arc<ServerState>, ctx: &ConnCtx) {
    let Some(binding) = &ctx.binding else {
        return;
    };
    let Some(handle) = state.registry.get(&binding.code) else {
        return;
    };

    let mut session = handle.lock().await;
    let now = clock::now_ms();
    match binding.role {
        Role::Host => {
            // A stale close must not clobber a host slot that has already
            // been rebound to a newer transport.
            let owns_slot = session
                .host
                .sender
                .as_ref()
                .is_some_and(|sender| sender.same_connection(&ctx.sender));
            if !owns_slot {
                return;
            }
            session.detach_host(now);
            session.send_to_clients(
                &state.meter,
                &ServerEvent::HostStatus {
                    online: false,
                    reason: "host-disconnected".to_string(),
                    timestamp: now,
                },
                None,
            );
            info!(code = %binding.code, "host detached");
        }
        _ => {
            if let Some(peer) = session.clients.remove(&binding.participant_id) {
                session.send_to_host(
                    &state.meter,
                    &ServerEvent::PeerLeft {
                        participant_id: peer.id,
                        label: peer.label,
                    },
                );
                debug!(code = %binding.code, participant = %binding.participant_id, "client left");
            }
        }
    }
}
