//! Socket abstraction under the gateway state machine.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

use crate::error::{ClientError, Result};

/// Close code and reason of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

/// An inbound frame the gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON text frame.
    Text(String),
    /// The peer closed the socket.
    Close(Option<CloseInfo>),
}

/// A duplex, message-framed connection.
pub trait Transport: Send + 'static {
    /// Send a text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Next inbound frame. `None` once the stream ended.
    ///
    /// Must be cancel-safe: the connection polls it inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame>>> + Send;

    /// Send a close frame.
    fn close(&mut self, code: u16, reason: String) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Open a socket to `url`, presenting `origin` and `user_agent` on the upgrade.
    fn connect(
        &self,
        url: &Url,
        origin: &str,
        user_agent: &str,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &Url, origin: &str, user_agent: &str) -> Result<WsTransport> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::ConnectFailed(format!("invalid gateway request: {e}")))?;

        let headers = request.headers_mut();
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(origin)
                .map_err(|e| ClientError::Config(format!("invalid origin header: {e}")))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ClientError::Config(format!("invalid user agent header: {e}")))?,
        );

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ClientError::ConnectFailed(format!("failed to connect: {e}")))?;

        Ok(WsTransport { stream })
    }
}

/// A gateway socket over `tokio-tungstenite`.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ClientError::Transport(format!("read failed: {e}")))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Close(frame) => {
                    let info = frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    });
                    return Some(Ok(Frame::Close(info)));
                }
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(data) => {
                    trace!(len = data.len(), "ignoring binary frame");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ClientError::Transport(format!("close failed: {e}")))
    }
}
