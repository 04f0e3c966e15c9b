//! Connection status and active transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Lifecycle status of the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The transport cascade is running.
    Connecting,
    /// A transport is active.
    Connected,
    /// No transport is active.
    #[default]
    Disconnected,
    /// The last attempt failed; transient before `Disconnected`.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Channel used to reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent WebSocket.
    Socket,
    /// Local HTTP.
    Http,
    /// HTTP over a wide-area tunnel.
    Tunnel,
    /// Store-and-forward relay.
    Relay,
    /// Nothing active.
    #[default]
    None,
}

impl Transport {
    /// Transports in cascade priority order.
    pub const CASCADE: [Self; 4] = [Self::Socket, Self::Http, Self::Tunnel, Self::Relay];
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Socket => "socket",
            Self::Http => "http",
            Self::Tunnel => "tunnel",
            Self::Relay => "relay",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Snapshot of the manager's `(status, transport)` pair.
///
/// `Connected` always carries a transport other than [`Transport::None`];
/// every other status carries [`Transport::None`]. The constructors are the
/// only way to build one, which keeps that pairing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionState {
    status: ConnectionStatus,
    transport: Transport,
}

impl ConnectionState {
    /// `connecting / none`.
    #[inline]
    #[must_use]
    pub const fn connecting() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            transport: Transport::None,
        }
    }

    /// `connected / transport`. Passing [`Transport::None`] yields
    /// `disconnected / none`.
    #[inline]
    #[must_use]
    pub const fn connected(transport: Transport) -> Self {
        match transport {
            Transport::None => Self::disconnected(),
            transport => Self {
                status: ConnectionStatus::Connected,
                transport,
            },
        }
    }

    /// `disconnected / none`.
    #[inline]
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            transport: Transport::None,
        }
    }

    /// `error / none`.
    #[inline]
    #[must_use]
    pub const fn error() -> Self {
        Self {
            status: ConnectionStatus::Error,
            transport: Transport::None,
        }
    }

    /// Returns the status.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Returns the active transport.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns `true` if a transport is active.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.status, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status, self.transport)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::disconnected());
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.transport(), Transport::None);
    }

    #[test]
    fn test_connected_never_without_transport() {
        assert_eq!(
            ConnectionState::connected(Transport::None),
            ConnectionState::disconnected()
        );
        for transport in Transport::CASCADE {
            let state = ConnectionState::connected(transport);
            assert!(state.is_connected());
            assert_eq!(state.transport(), transport);
        }
    }

    #[test]
    fn test_serializes_lowercase() {
        let value = serde_json::to_value(ConnectionState::connected(Transport::Tunnel))
            .expect("serialize");
        assert_eq!(value, serde_json::json!({ "status": "connected", "transport": "tunnel" }));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::connected(Transport::Socket).to_string(), "connected/socket");
        assert_eq!(ConnectionState::error().to_string(), "error/none");
    }

    #[test]
    fn test_cascade_order() {
        assert_eq!(
            Transport::CASCADE,
            [Transport::Socket, Transport::Http, Transport::Tunnel, Transport::Relay]
        );
    }
}
