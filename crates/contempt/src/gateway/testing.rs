//! In-memory transport for driving the gateway state machine in tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use contempt_proto::{GatewayPacket, OpCode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use super::transport::{CloseInfo, Connector, Frame, Transport};
use crate::error::{ClientError, Result};

/// What the client did on a fake socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientEvent {
    Text(String),
    Close(u16),
}

/// Connector handing every new socket's server half to the test.
#[derive(Clone)]
pub(crate) struct FakeConnector {
    servers: mpsc::UnboundedSender<FakeServer>,
    fail_next: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
    urls: Arc<Mutex<Vec<Url>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            servers,
            fail_next: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(AtomicU32::new(0)),
            urls: Arc::new(Mutex::new(Vec::new())),
        };
        (connector, rx)
    }

    /// Make the next `n` connection attempts fail.
    pub(crate) fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self, url: &Url, _origin: &str, _user_agent: &str) -> Result<FakeTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::ConnectFailed("connection refused".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let server = FakeServer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.servers
            .send(server)
            .map_err(|_| ClientError::ConnectFailed("test dropped the server side".to_string()))?;

        Ok(FakeTransport {
            incoming,
            outgoing,
            closed: false,
        })
    }
}

pub(crate) struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    closed: bool,
}

impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing
            .send(ClientEvent::Text(text))
            .map_err(|_| ClientError::Transport("peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        if self.closed {
            return None;
        }
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: String) -> Result<()> {
        self.closed = true;
        // The peer may already be gone.
        let _ = self.outgoing.send(ClientEvent::Close(code));
        Ok(())
    }
}

/// The server half of one fake socket. Dropping it ends the stream.
pub(crate) struct FakeServer {
    pub(crate) url: Url,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
}

impl FakeServer {
    pub(crate) fn send_packet(&self, packet: &GatewayPacket) {
        let text = packet.to_json().expect("packet encodes");
        let _ = self.to_client.send(Frame::Text(text));
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub(crate) fn hello(&self, interval_ms: u64) {
        self.send_packet(&GatewayPacket::new(
            OpCode::Hello,
            Some(json!({ "heartbeat_interval": interval_ms })),
        ));
    }

    pub(crate) fn dispatch(&self, event: &str, seq: u64, d: Value) {
        self.send_packet(&GatewayPacket::dispatch(event, seq, d));
    }

    pub(crate) fn ready(&self, seq: u64, session_id: &str, resume_url: &str) {
        self.dispatch(
            "READY",
            seq,
            json!({ "session_id": session_id, "resume_gateway_url": resume_url }),
        );
    }

    pub(crate) fn ack(&self) {
        self.send_packet(&GatewayPacket::new(OpCode::HeartbeatAck, None));
    }

    pub(crate) fn invalid_session(&self, resumable: bool) {
        self.send_packet(&GatewayPacket::new(
            OpCode::InvalidSession,
            Some(Value::Bool(resumable)),
        ));
    }

    pub(crate) fn request_reconnect(&self) {
        self.send_packet(&GatewayPacket::new(OpCode::Reconnect, None));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Frame::Close(Some(CloseInfo {
            code,
            reason: reason.to_string(),
        })));
    }

    pub(crate) async fn recv_event(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    pub(crate) fn try_recv_event(&mut self) -> Option<ClientEvent> {
        self.from_client.try_recv().ok()
    }

    /// Close code of the next close, skipping heartbeats. `None` if the
    /// socket was dropped without one.
    pub(crate) async fn recv_close(&mut self) -> Option<u16> {
        loop {
            match self.recv_event().await? {
                ClientEvent::Close(code) => return Some(code),
                ClientEvent::Text(text) => {
                    let packet = GatewayPacket::from_json(&text).expect("client sent valid json");
                    assert_eq!(packet.op, OpCode::Heartbeat, "unexpected packet {packet:?}");
                }
            }
        }
    }

    /// Next packet sent by the client; panics on a close or a dropped socket.
    pub(crate) async fn recv_packet(&mut self) -> GatewayPacket {
        match self.recv_event().await {
            Some(ClientEvent::Text(text)) => GatewayPacket::from_json(&text).expect("client sent valid json"),
            other => panic!("expected a packet, got {other:?}"),
        }
    }

    /// Next packet with the given op, skipping heartbeats.
    pub(crate) async fn recv_op(&mut self, op: OpCode) -> GatewayPacket {
        loop {
            let packet = self.recv_packet().await;
            if packet.op == op {
                return packet;
            }
            assert_eq!(packet.op, OpCode::Heartbeat, "unexpected packet {packet:?}");
        }
    }
}
