//! Connection state types.

use std::fmt;

/// Observable state of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Opening the socket and waiting for HELLO.
    Connecting,
    /// Identify sent, waiting for READY.
    Identifying,
    /// Resume sent, waiting for RESUMED.
    Resuming,
    /// Session established.
    Connected,
    /// Session established but heartbeat ACKs are late.
    Unviable,
    /// Socket lost, waiting out the backoff.
    Reconnecting,
    /// Closed on request.
    Disconnected,
    /// Closed for good: authentication failure, fatal close code or too
    /// many failed attempts.
    Failed,
}

impl ConnectionState {
    /// Whether a session is established, degraded or not.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Unviable)
    }

    /// Whether the connection will not make progress without a new `connect`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Unviable => "unviable",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_unviable_counts_as_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Unviable.is_connected());
        assert!(!ConnectionState::Resuming.is_connected());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Unviable.to_string(), "unviable");
    }
}
