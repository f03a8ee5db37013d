//! JSON wire envelope and message shapes.
//!
//! Every frame on the transport is a UTF-8 text message of the form
//! `{"type": "<tag>", "payload": {…}}`. Inbound frames are decoded in two
//! steps — raw envelope first, then per-command payload — so an unknown tag
//! is still available for the error reply. Outbound frames are a tagged enum
//! serialized once per send; the serialized form is what the traffic meter
//! charges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw inbound envelope; payload decoding is deferred to the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Command tag, e.g. `host:init`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command payload; JSON `null` when absent.
    #[serde(default)]
    pub payload: Value,
}

impl InboundEnvelope {
    /// Decode a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type` field.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Peer role carried in `session:ready` and chat frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The singular authoritative peer of a session.
    Host,
    /// A spoke peer streaming telemetry to the host.
    Client,
    /// Server-originated diagnostic messages.
    System,
}

/// A validated location fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Reported accuracy in meters, when the uplink carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Fix timestamp in unix milliseconds.
    pub timestamp: u64,
}

/// A geographic point inside a route item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// A single waypoint of a planned route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteItem {
    /// Waypoint identifier.
    pub id: String,
    /// Optional waypoint name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Waypoint position.
    pub position: GeoPoint,
}

/// A sanitized planned route uploaded by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Route identifier.
    pub id: String,
    /// Optional route name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional route display color.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Waypoints, never empty after sanitization.
    pub items: Vec<RouteItem>,
}

/// Wire description of a client peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Participant id, unique within the session.
    pub participant_id: String,
    /// Display label.
    pub label: String,
    /// Assigned marker color.
    pub color: String,
    /// Last accepted location fix, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_location: Option<LocationFix>,
    /// Current sanitized routes, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
}

/// Cached host-state snapshot in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Strictly increasing snapshot version.
    pub version: u64,
    /// The opaque compressed blob as published by the host.
    pub data: String,
    /// Always `true`; the blob travels compressed.
    pub compressed: bool,
    /// Content hash of the blob (SHA-1, base64).
    pub hash: String,
    /// Blob size in bytes.
    pub size: u64,
}

/// A chat or diagnostic message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Sender's participant id (`server` for diagnostics).
    pub participant_id: String,
    /// Sender's display label.
    pub label: String,
    /// Sender's role.
    pub role: Role,
    /// Message text.
    pub text: String,
    /// Server receive timestamp in unix milliseconds.
    pub timestamp: u64,
}

/// Payload of `session:ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    /// Canonical session code.
    pub session_id: String,
    /// Role granted to the receiving transport.
    pub role: Role,
    /// Participant id assigned to the receiving transport.
    pub participant_id: String,
    /// Current client peers; empty for fresh joins.
    pub peers: Vec<PeerInfo>,
    /// Cached state snapshot; `null` except on host resume.
    pub state: Option<StateSnapshot>,
    /// Current location upload interval in milliseconds.
    pub interval_ms: u64,
    /// Host resume token; absent for clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

/// Server-originated frames, tagged the way they appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    /// Session attached; carries identity and the session's current shape.
    #[serde(rename = "session:ready")]
    Ready(ReadyPayload),
    /// A client joined; sent to the host only.
    #[serde(rename = "session:peer-joined")]
    PeerJoined(PeerInfo),
    /// A client left; sent to the host only.
    #[serde(rename = "session:peer-left", rename_all = "camelCase")]
    PeerLeft {
        /// Departed participant id.
        participant_id: String,
        /// Departed participant label.
        label: String,
    },
    /// A client's accepted location fix; sent to the host only.
    #[serde(rename = "session:location", rename_all = "camelCase")]
    Location {
        /// Sender's participant id.
        participant_id: String,
        /// The accepted fix.
        location: LocationFix,
    },
    /// A client's current routes; sent to the host only.
    #[serde(rename = "session:peer-routes", rename_all = "camelCase")]
    PeerRoutes {
        /// Sender's participant id.
        participant_id: String,
        /// Sanitized routes; may be empty when the client cleared them.
        routes: Vec<Route>,
    },
    /// New host-state snapshot; sent to the host only.
    #[serde(rename = "session:state")]
    State(StateSnapshot),
    /// Location cadence changed; broadcast to host and clients.
    #[serde(rename = "session:interval", rename_all = "camelCase")]
    Interval {
        /// New interval in milliseconds, already clamped.
        interval_ms: u64,
    },
    /// Host presence changed; sent to clients.
    #[serde(rename = "session:host-status")]
    HostStatus {
        /// Whether the host is currently bound.
        online: bool,
        /// `host-disconnected` or `host-resumed`.
        reason: String,
        /// Unix milliseconds of the transition.
        timestamp: u64,
    },
    /// Heartbeat echo to the requester.
    #[serde(rename = "session:heartbeat")]
    Heartbeat {
        /// Server clock in unix milliseconds.
        timestamp: u64,
    },
    /// Chat broadcast or `/data` diagnostic reply.
    #[serde(rename = "session:message")]
    Message(ChatMessage),
    /// Session terminated; last frame before the transport closes.
    #[serde(rename = "session:ended")]
    Ended {
        /// `host-ended`, `host-timeout` or `session-expired`.
        reason: String,
        /// Unix milliseconds of the termination.
        timestamp: u64,
    },
    /// Recoverable error surfaced to the offending transport only.
    #[serde(rename = "session:error")]
    Error {
        /// Short human-readable description.
        message: String,
    },
}

impl ServerEvent {
    /// Serialized text form of the event, as charged to the traffic meter.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("event serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_decodes_with_payload() {
        let envelope = InboundEnvelope::decode(r#"{"type":"client:join","payload":{"sessionId":"abc"}}"#).unwrap();
        assert_eq!(envelope.kind, "client:join");
        assert_eq!(envelope.payload["sessionId"], "abc");
    }

    #[test]
    fn envelope_decodes_without_payload() {
        let envelope = InboundEnvelope::decode(r#"{"type":"host:init"}"#).unwrap();
        assert_eq!(envelope.kind, "host:init");
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn envelope_rejects_missing_type() {
        assert!(InboundEnvelope::decode(r#"{"payload":{}}"#).is_err());
        assert!(InboundEnvelope::decode("not json").is_err());
        assert!(InboundEnvelope::decode(r#"{"type":42}"#).is_err());
    }

    #[test]
    fn ready_serializes_null_state_and_omits_client_token() {
        let ready = ServerEvent::Ready(ReadyPayload {
            session_id: "K7M2FQ".into(),
            role: Role::Client,
            participant_id: "ABC-42".into(),
            peers: Vec::new(),
            state: None,
            interval_ms: 10_000,
            resume_token: None,
        });
        let value: Value = serde_json::from_str(&ready.encode()).unwrap();
        assert_eq!(value["type"], "session:ready");
        assert!(value["payload"]["state"].is_null());
        assert_eq!(value["payload"]["intervalMs"], 10_000);
        assert!(value["payload"].get("resumeToken").is_none());
    }

    #[test]
    fn ready_carries_host_token() {
        let ready = ServerEvent::Ready(ReadyPayload {
            session_id: "K7M2FQ".into(),
            role: Role::Host,
            participant_id: "HQX".into(),
            peers: Vec::new(),
            state: None,
            interval_ms: 10_000,
            resume_token: Some("ab".repeat(24)),
        });
        let value: Value = serde_json::from_str(&ready.encode()).unwrap();
        assert_eq!(value["payload"]["role"], "host");
        assert_eq!(value["payload"]["resumeToken"].as_str().unwrap().len(), 48);
    }

    #[test]
    fn event_tags_match_the_wire_protocol() {
        let cases: Vec<(ServerEvent, &str)> = vec![
            (
                ServerEvent::Interval { interval_ms: 5000 },
                "session:interval",
            ),
            (
                ServerEvent::Heartbeat { timestamp: 1 },
                "session:heartbeat",
            ),
            (
                ServerEvent::Ended {
                    reason: "host-ended".into(),
                    timestamp: 1,
                },
                "session:ended",
            ),
            (
                ServerEvent::Error {
                    message: "nope".into(),
                },
                "session:error",
            ),
            (
                ServerEvent::HostStatus {
                    online: false,
                    reason: "host-disconnected".into(),
                    timestamp: 1,
                },
                "session:host-status",
            ),
            (
                ServerEvent::PeerLeft {
                    participant_id: "ABC-42".into(),
                    label: "recon-2".into(),
                },
                "session:peer-left",
            ),
        ];
        for (event, tag) in cases {
            let value: Value = serde_json::from_str(&event.encode()).unwrap();
            assert_eq!(value["type"], tag);
        }
    }

    #[test]
    fn location_event_uses_camel_case_fields() {
        let event = ServerEvent::Location {
            participant_id: "ABC-42".into(),
            location: LocationFix {
                lat: 59.3,
                lng: 18.1,
                accuracy: None,
                timestamp: 1_700_000_000_000,
            },
        };
        let value: Value = serde_json::from_str(&event.encode()).unwrap();
        assert_eq!(value["payload"]["participantId"], "ABC-42");
        assert!(value["payload"]["location"].get("accuracy").is_none());
    }

    #[test]
    fn peer_info_omits_empty_optionals() {
        let info = PeerInfo {
            participant_id: "ABC-42".into(),
            label: "recon-2".into(),
            color: "#ef4444".into(),
            last_location: None,
            routes: None,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("lastLocation").is_none());
        assert!(value.get("routes").is_none());
    }

    #[test]
    fn state_event_round_trips() {
        let event = ServerEvent::State(StateSnapshot {
            version: 3,
            data: "H4sIA".into(),
            compressed: true,
            hash: "abc=".into(),
            size: 5,
        });
        let back: ServerEvent = serde_json::from_str(&event.encode()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn system_role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::System).unwrap(), json!("system"));
        assert_eq!(serde_json::to_value(Role::Host).unwrap(), json!("host"));
    }
}
