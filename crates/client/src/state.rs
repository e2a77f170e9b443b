//! Connection lifecycle state as observed by consumers.

use std::fmt;

use crate::error::ConnectionError;

/// Lifecycle state of the shared hub connection.
///
/// `Connecting` and `Reconnecting` are transient; `Disconnected` and
/// `Connected` are rest states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Everything the supervisor publishes about the current handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Identity of the logical handle. Survives built-in reconnects.
    pub handle_id: Option<u64>,
    /// Server-assigned transport id; only present while connected.
    pub connection_id: Option<String>,
    /// Number of connection attempts started so far.
    pub attempt_sequence: u64,
    /// Current built-in reconnect attempt while `Reconnecting`.
    pub reconnect_attempt: u32,
    pub last_error: Option<ConnectionError>,
}
