//! Session record, peers and directed sends.

use crate::traffic::{Direction, TrafficMeter};
use rally_common::types::{CLIENT_PALETTE, HOST_COLOR, HOST_LABEL};
use rally_common::wire::{LocationFix, PeerInfo, Route, ServerEvent, StateSnapshot};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Handle used to push frames to a connection's writer task.
///
/// Sends are best-effort with no queueing beyond the channel buffer: a
/// closed or saturated channel drops the frame and reports it.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<Message>,
}

impl PeerSender {
    /// Wrap a connection's delivery channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Serialize and send an event, charging the meter's out direction.
    /// Returns whether the frame was handed to the transport.
    pub fn send(&self, meter: &TrafficMeter, event: &ServerEvent) -> bool {
        let text = event.encode();
        let bytes = text.len() as u64;
        match self.tx.try_send(Message::Text(text)) {
            Ok(()) => {
                meter.record(Direction::Out, bytes);
                true
            }
            Err(_) => false,
        }
    }

    /// Ask the writer task to close the transport with the given code.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.tx.try_send(Message::Close(Some(frame))).is_ok()
    }

    /// Whether the writer task is still draining this channel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Whether two senders feed the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// The authoritative peer of a session.
#[derive(Debug, Clone)]
pub struct HostPeer {
    /// Participant id.
    pub id: String,
    /// Display label, always [`HOST_LABEL`].
    pub label: String,
    /// Marker color, always [`HOST_COLOR`].
    pub color: String,
    /// Bound transport; `None` while detached.
    pub sender: Option<PeerSender>,
    /// When the last location fix was accepted, unix milliseconds.
    pub last_location_at: Option<u64>,
    /// The last accepted location fix.
    pub last_location: Option<LocationFix>,
}

/// A spoke peer streaming telemetry to the host.
#[derive(Debug, Clone)]
pub struct ClientPeer {
    /// Participant id, unique within the session.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Palette color assigned at join.
    pub color: String,
    /// Bound transport.
    pub sender: PeerSender,
    /// When the last location fix was accepted, unix milliseconds.
    pub last_location_at: Option<u64>,
    /// The last accepted location fix.
    pub last_location: Option<LocationFix>,
    /// Current sanitized routes; `None` when the client has none.
    pub routes: Option<Vec<Route>>,
    /// Content hash of the last routes upload, for deduplication.
    pub routes_hash: Option<String>,
}

impl ClientPeer {
    /// Wire description of this peer.
    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            participant_id: self.id.clone(),
            label: self.label.clone(),
            color: self.color.clone(),
            last_location: self.last_location.clone(),
            routes: self.routes.clone(),
        }
    }
}

/// One relayed session: host slot, client set, cached state, bookkeeping.
#[derive(Debug)]
pub struct Session {
    /// Canonical uppercase session code.
    pub code: String,
    /// The host slot.
    pub host: HostPeer,
    /// Client peers by participant id.
    pub clients: HashMap<String, ClientPeer>,
    /// Strictly increasing version of the cached state blob.
    pub state_version: u64,
    /// Cached host-state blob, verbatim as published.
    pub state_blob: Option<String>,
    /// Content hash of the cached blob.
    pub state_hash: Option<String>,
    /// Current location upload interval in milliseconds.
    pub interval_ms: u64,
    /// Secret the host presents to rebind after a disconnect.
    pub resume_token: String,
    /// Cursor into the client color palette.
    pub color_cursor: usize,
    /// Last activity timestamp, unix milliseconds. Non-decreasing.
    pub last_activity: u64,
    /// When the host transport went away; `None` while the host is bound.
    pub host_detached_at: Option<u64>,
}

impl Session {
    /// Create a session with an unbound host slot.
    #[must_use]
    pub fn new(code: String, host_id: String, resume_token: String, interval_ms: u64, now: u64) -> Self {
        Self {
            code,
            host: HostPeer {
                id: host_id,
                label: HOST_LABEL.to_string(),
                color: HOST_COLOR.to_string(),
                sender: None,
                last_location_at: None,
                last_location: None,
            },
            clients: HashMap::new(),
            state_version: 0,
            state_blob: None,
            state_hash: None,
            interval_ms,
            resume_token,
            color_cursor: 0,
            last_activity: now,
            host_detached_at: None,
        }
    }

    /// Record activity. Monotonic: an older timestamp never rewinds it.
    pub fn touch(&mut self, now: u64) {
        self.last_activity = self.last_activity.max(now);
    }

    /// Next palette color for a joining client.
    pub fn next_color(&mut self) -> String {
        let color = CLIENT_PALETTE[self.color_cursor % CLIENT_PALETTE.len()];
        self.color_cursor += 1;
        color.to_string()
    }

    /// Bind a transport to the host slot and rotate the resume token.
    pub fn attach_host(&mut self, sender: PeerSender, resume_token: String, now: u64) {
        self.host.sender = Some(sender);
        self.resume_token = resume_token;
        self.host_detached_at = None;
        self.touch(now);
    }

    /// Unbind the host transport and start the resumption grace window.
    pub fn detach_host(&mut self, now: u64) {
        self.host.sender = None;
        self.host_detached_at = Some(now);
        self.touch(now);
    }

    /// Replace the cached state blob; returns the new version.
    pub fn replace_state(&mut self, blob: String, hash: String) -> u64 {
        self.state_version += 1;
        self.state_blob = Some(blob);
        self.state_hash = Some(hash);
        self.state_version
    }

    /// Cached state snapshot in wire form, if any blob was published.
    #[must_use]
    pub fn state_snapshot(&self) -> Option<StateSnapshot> {
        match (&self.state_blob, &self.state_hash) {
            (Some(data), Some(hash)) => Some(StateSnapshot {
                version: self.state_version,
                data: data.clone(),
                compressed: true,
                hash: hash.clone(),
                size: data.len() as u64,
            }),
            _ => None,
        }
    }

    /// Wire descriptions of all client peers.
    #[must_use]
    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        self.clients.values().map(ClientPeer::info).collect()
    }

    /// Send an event to the host, if bound. Returns whether it was sent.
    pub fn send_to_host(&self, meter: &TrafficMeter, event: &ServerEvent) -> bool {
        self.host
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(meter, event))
    }

    /// Send an event to every client except `exclude`. Returns the number
    /// of transports the frame was handed to.
    pub fn send_to_clients(
        &self,
        meter: &TrafficMeter,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> usize {
        self.clients
            .values()
            .filter(|peer| exclude != Some(peer.id.as_str()))
            .filter(|peer| peer.sender.send(meter, event))
            .count()
    }

    /// Send an event to the host and every client except `exclude`.
    pub fn send_to_all(
        &self,
        meter: &TrafficMeter,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> usize {
        let host_sent = if exclude == Some(self.host.id.as_str()) {
            false
        } else {
            self.send_to_host(meter, event)
        };
        usize::from(host_sent) + self.send_to_clients(meter, event, exclude)
    }
}
