//! Gateway WebSocket connection.
//!
//! Manages one authenticated session with the gateway: HELLO, identify or
//! resume, heartbeats, and automatic reconnection with exponential backoff.

mod close;
mod connection;
mod heartbeat;
mod reconnect;
mod session;
mod state;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use close::{CloseAction, CloseCodePolicy, CLIENT_CLOSE_CODE, ZOMBIE_CLOSE_CODE};
pub use connection::{GatewayConfig, GatewayConnection};
pub use heartbeat::HeartbeatConfig;
pub use reconnect::{calculate_backoff, Backoff, ReconnectConfig};
pub use session::SessionInfo;
pub use state::ConnectionState;
pub use transport::{CloseInfo, Connector, Frame, Transport, WsConnector, WsTransport};
