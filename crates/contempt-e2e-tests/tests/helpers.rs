//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use contempt::ClientConfig;
use contempt_proto::{GatewayPacket, OpCode};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Token the test servers expect.
pub const TEST_TOKEN: &str = "test-token";

/// Client configuration pointing at the given test servers, with short
/// reconnect delays.
pub fn test_config(gateway: &TestGateway, api: Option<&TestApi>) -> ClientConfig {
    let mut config = ClientConfig::with_token(TEST_TOKEN);
    config.gateway_url = gateway.ws_url();
    config.api_base_url = api.map(TestApi::base_url);
    config.gateway.hello_timeout_ms = 2_000;
    config.gateway.close_timeout_ms = 500;
    config.gateway.invalid_session_delay_min_ms = 10;
    config.gateway.invalid_session_delay_max_ms = 20;
    config.reconnect.initial_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config.reconnect.jitter_ms = 0;
    config.http.retry_base_delay_ms = 20;
    config
}

/// A full READY payload for one guild with two channels, one DM and one
/// group DM.
pub fn ready_payload(resume_url: &str) -> Value {
    json!({
        "v": 9,
        "session_id": "session-1",
        "resume_gateway_url": resume_url,
        "user": {"id": "1", "username": "me", "discriminator": "0001"},
        "guilds": [{
            "id": "100",
            "name": "G1",
            "channels": [
                {"id": "101", "type": 0, "name": "general", "position": 0},
                {"id": "102", "type": 0, "name": "random", "position": 1}
            ]
        }],
        "private_channels": [
            {"id": "200", "type": 1, "recipient_ids": ["2"]},
            {"id": "201", "type": 3, "recipient_ids": ["2", "3"]}
        ],
        "users": [
            {"id": "2", "username": "alice"},
            {"id": "3", "username": "bob"}
        ],
        "user_settings": {"theme": "dark"}
    })
}

/// Wait until `check` holds, polling.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within {TEST_TIMEOUT:?}");
}

// ============================================================================
// Gateway
// ============================================================================

/// Local WebSocket gateway handing every accepted socket to the test.
pub struct TestGateway {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<GatewayPeer>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    /// Start a gateway on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(peer) = GatewayPeer::accept(stream).await {
                        let _ = tx.send(peer);
                    }
                });
            }
        });

        Self {
            addr,
            peers,
            handle,
        }
    }

    /// WebSocket URL of this gateway.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// The next client socket.
    pub async fn accept(&mut self) -> GatewayPeer {
        timeout(TEST_TIMEOUT, self.peers.recv())
            .await
            .expect("timed out waiting for a gateway connection")
            .expect("gateway listener stopped")
    }

    /// Whether another socket arrives within `wait`.
    pub async fn no_connection_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.peers.recv()).await.is_err()
    }

    /// Stop accepting connections.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Server side of one client socket.
pub struct GatewayPeer {
    ws: WebSocketStream<TcpStream>,
    /// `Origin` of the upgrade request.
    pub origin: Option<String>,
    /// `User-Agent` of the upgrade request.
    pub user_agent: Option<String>,
    /// Query string of the upgrade request.
    pub query: String,
}

impl GatewayPeer {
    async fn accept(stream: TcpStream) -> Option<Self> {
        let captured = Arc::new(Mutex::new((None, None, String::new())));
        let sink = Arc::clone(&captured);
        let callback = move |request: &Request,
                             response: HandshakeResponse|
              -> Result<HandshakeResponse, ErrorResponse> {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            *sink.lock() = (
                header("origin"),
                header("user-agent"),
                request.uri().query().unwrap_or_default().to_string(),
            );
            Ok(response)
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.ok()?;
        let (origin, user_agent, query) = captured.lock().clone();
        Some(Self {
            ws,
            origin,
            user_agent,
            query,
        })
    }

    /// Send a packet.
    pub async fn send(&mut self, packet: &GatewayPacket) {
        let text = packet.to_json().unwrap();
        self.ws.send(WsMessage::Text(text.into())).await.unwrap();
    }

    /// Send HELLO.
    pub async fn hello(&mut self, interval_ms: u64) {
        self.send(&GatewayPacket::new(
            OpCode::Hello,
            Some(json!({ "heartbeat_interval": interval_ms })),
        ))
        .await;
    }

    /// Send a dispatch.
    pub async fn dispatch(&mut self, event: &str, seq: u64, d: Value) {
        self.send(&GatewayPacket::dispatch(event, seq, d)).await;
    }

    /// Acknowledge a heartbeat.
    pub async fn ack(&mut self) {
        self.send(&GatewayPacket::new(OpCode::HeartbeatAck, None)).await;
    }

    /// Close the socket with `code`.
    pub async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }

    /// Next frame from the client: `Ok(packet)`, or `Err(close code)` once
    /// the client closes. `0` stands for a close without a code or a
    /// dropped socket.
    pub async fn recv(&mut self) -> Result<GatewayPacket, u16> {
        loop {
            let message = timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for the client");
            match message {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(GatewayPacket::from_json(text.as_str()).unwrap());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(frame.map_or(0, |f| u16::from(f.code)));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Err(0),
            }
        }
    }

    /// Next packet with the given op, skipping heartbeats.
    pub async fn recv_op(&mut self, op: OpCode) -> GatewayPacket {
        loop {
            let packet = self.recv().await.expect("client closed the socket");
            if packet.op == op {
                return packet;
            }
            assert_eq!(packet.op, OpCode::Heartbeat, "unexpected packet {packet:?}");
        }
    }

    /// Close code sent by the client, skipping heartbeats.
    pub async fn recv_close(&mut self) -> u16 {
        loop {
            match self.recv().await {
                Ok(packet) => {
                    assert_eq!(packet.op, OpCode::Heartbeat, "unexpected packet {packet:?}");
                }
                Err(code) => return code,
            }
        }
    }
}

// ============================================================================
// REST API
// ============================================================================

/// One request seen by the REST server.
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: &'static str,
    pub channel: u64,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub super_properties: bool,
    pub at: Instant,
}

#[derive(Default)]
struct ApiState {
    hits: Mutex<Vec<Hit>>,
    /// Canned responses per `(method, channel)`, served before the default.
    scripted: Mutex<HashMap<(&'static str, u64), VecDeque<(StatusCode, Value)>>>,
    /// Messages per channel, oldest first.
    messages: Mutex<HashMap<u64, Vec<Value>>>,
}

impl ApiState {
    fn record(&self, method: &'static str, channel: u64, query: HashMap<String, String>, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.hits.lock().push(Hit {
            method,
            channel,
            query,
            authorization: header("authorization"),
            user_agent: header("user-agent"),
            super_properties: headers.contains_key("x-super-properties"),
            at: Instant::now(),
        });
    }

    fn scripted(&self, method: &'static str, channel: u64) -> Option<Response> {
        let (status, body) = self
            .scripted
            .lock()
            .get_mut(&(method, channel))
            .and_then(VecDeque::pop_front)?;
        Some((status, Json(body)).into_response())
    }
}

/// Local REST server with scripted responses.
pub struct TestApi {
    pub addr: SocketAddr,
    state: Arc<ApiState>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestApi {
    /// Start a server on an available port.
    pub async fn start() -> Self {
        let state = Arc::new(ApiState::default());
        let router = Router::new()
            .route(
                "/api/v9/channels/{id}/messages",
                get(list_messages).post(create_message),
            )
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// REST root for the client.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v9", self.addr)
    }

    /// Serve `status` with `body` for the next matching request.
    pub fn enqueue(&self, method: &'static str, channel: u64, status: StatusCode, body: Value) {
        self.state
            .scripted
            .lock()
            .entry((method, channel))
            .or_default()
            .push_back((status, body));
    }

    /// Store `count` messages in `channel` with ids `first..first+count`.
    pub fn seed_messages(&self, channel: u64, first: u64, count: u64) {
        let mut messages = self.state.messages.lock();
        let stored = messages.entry(channel).or_default();
        for id in first..first + count {
            stored.push(message_json(id, channel, &format!("message {id}"), None));
        }
    }

    /// Every request so far.
    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().clone()
    }

    /// Requests so far for `(method, channel)`.
    pub fn hits_for(&self, method: &str, channel: u64) -> Vec<Hit> {
        self.hits()
            .into_iter()
            .filter(|h| h.method == method && h.channel == channel)
            .collect()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// A message object as the server returns it.
pub fn message_json(id: u64, channel: u64, content: &str, nonce: Option<&str>) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel.to_string(),
        "author": {"id": "1", "username": "me", "discriminator": "0001"},
        "content": content,
        "timestamp": "2022-01-01T12:00:00.000000+00:00",
        "tts": false,
        "nonce": nonce,
    })
}

async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Path(channel): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("GET", channel, query.clone(), &headers);
    if let Some(response) = state.scripted("GET", channel) {
        return response;
    }

    let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(50);
    let before: Option<u64> = query.get("before").and_then(|b| b.parse().ok());
    let messages = state.messages.lock();
    let page: Vec<Value> = messages
        .get(&channel)
        .map(|stored| {
            stored
                .iter()
                .rev()
                .filter(|m| {
                    let id: u64 = m["id"].as_str().unwrap().parse().unwrap();
                    before.is_none_or(|before| id < before)
                })
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(page).into_response()
}

async fn create_message(
    State(state): State<Arc<ApiState>>,
    Path(channel): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", channel, HashMap::new(), &headers);
    if let Some(response) = state.scripted("POST", channel) {
        return response;
    }

    let mut messages = state.messages.lock();
    let stored = messages.entry(channel).or_default();
    let id = 1_000 + stored.len() as u64;
    let message = message_json(
        id,
        channel,
        body["content"].as_str().unwrap_or_default(),
        body["nonce"].as_str(),
    );
    stored.push(message.clone());
    Json(message).into_response()
}
