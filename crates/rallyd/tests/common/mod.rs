use futures_util::{SinkExt, StreamExt};
use rally_common::wire::ServerEvent;
use rallyd::config::ServerConfig;
use rallyd::registry::Registry;
use rallyd::server::ServerState;
use rallyd::traffic::TrafficMeter;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        health_addr: "127.0.0.1:0".parse().unwrap(),
        code_length: 6,
        location_interval_ms: 10_000,
        max_client_routes: 8,
        max_route_points: 80,
        traffic_window_secs: 60,
        session_ttl_ms: 21_600_000,
        host_resume_grace_ms: 900_000,
        ping_interval_secs: 30,
    }
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn send_json(&mut self, frame: Value) {
        self.ws_tx
            .send(Message::Text(frame.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_command(&mut self, kind: &str, payload: Value) {
        self.send_json(json!({"type": kind, "payload": payload}))
            .await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn recv_event(&mut self) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("well-formed server event")
                }
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_event_timeout(&mut self, timeout: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(timeout, self.recv_event()).await.ok()
    }

    /// Consume the next event, which must be a `session:peer-joined`;
    /// returns the joined participant id.
    pub async fn expect_peer_joined(&mut self) -> String {
        match self.recv_event().await {
            ServerEvent::PeerJoined(info) => info.participant_id,
            other => panic!("expected session:peer-joined, got {other:?}"),
        }
    }

    /// Receive until the server closes the transport; returns the close
    /// frame, skipping any pending text frames.
    pub async fn recv_close(&mut self) -> Option<CloseFrame<'static>> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for close");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState {
        registry: Registry::new(),
        meter: TrafficMeter::new(60),
        config: test_config(addr),
    });

    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = rallyd::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Connect a host, run `host:init`, and hand back the ready payload fields.
pub async fn start_host(addr: &SocketAddr) -> (TestClient, String, String) {
    let mut host = TestClient::connect(addr).await;
    host.send_command("host:init", Value::Null).await;
    let ServerEvent::Ready(ready) = host.recv_event().await else {
        panic!("expected session:ready for host");
    };
    let token = ready.resume_token.expect("host ready carries a token");
    (host, ready.session_id, token)
}

/// Connect and join a client to the given session code.
pub async fn join_client(addr: &SocketAddr, code: &str) -> (TestClient, String) {
    let mut client = TestClient::connect(addr).await;
    client
        .send_command("client:join", json!({"sessionId": code}))
        .await;
    let ServerEvent::Ready(ready) = client.recv_event().await else {
        panic!("expected session:ready for client");
    };
    (client, ready.participant_id)
}
