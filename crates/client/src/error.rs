//! Connection-level and command-level errors.

use std::time::Duration;

use thiserror::Error;

use crate::state::ConnectionState;
use crate::transport::TransportError;

/// Why a connection could not be established or was lost.
///
/// `Clone` so a single in-flight attempt can hand the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// No credential is available.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The hub refused the credential.
    #[error("credential rejected by the hub: {0}")]
    Unauthorized(String),

    /// Protocol negotiation failed (version mismatch, unsupported transport).
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),

    /// A live connection heard nothing from the hub for too long.
    #[error("no message from the hub within {0:?}")]
    ServerTimeout(Duration),

    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server closed the connection and did not allow a reconnect.
    #[error("connection closed by the hub: {0}")]
    Closed(String),

    /// The attempt was abandoned by a deliberate teardown.
    #[error("connection attempt stopped")]
    Stopped,
}

impl ConnectionError {
    /// Expected causes that should never surface as alarms.
    pub fn is_benign(&self) -> bool {
        matches!(self, ConnectionError::Stopped)
    }

    /// Failures that require the user to authenticate again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ConnectionError::NotAuthenticated | ConnectionError::Unauthorized(_)
        )
    }
}

impl From<TransportError> for ConnectionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized(reason) => ConnectionError::Unauthorized(reason),
            TransportError::Handshake(reason) => ConnectionError::HandshakeRejected(reason.to_string()),
            TransportError::Negotiate(reason) => ConnectionError::HandshakeRejected(reason),
            TransportError::Connect(reason) => ConnectionError::Transport(reason),
            TransportError::Closed => ConnectionError::Transport("transport closed".to_string()),
        }
    }
}

/// Failure of a single outbound command. Never affects the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No connected handle; nothing was sent.
    #[error("hub connection is not ready ({state})")]
    NotReady { state: ConnectionState },

    /// The server completed the invocation with an error.
    #[error("`{target}` rejected by the hub: {reason}")]
    Rejected { target: &'static str, reason: String },

    #[error("`{target}` was not acknowledged within {timeout:?}")]
    Timeout {
        target: &'static str,
        timeout: Duration,
    },

    /// The connection went away while the call was in flight.
    #[error("connection closed before `{target}` completed")]
    ConnectionClosed { target: &'static str },

    #[error("failed to encode `{target}`: {reason}")]
    Encode { target: &'static str, reason: String },
}

impl CommandError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, CommandError::NotReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_name_their_phase() {
        let handshake = ConnectionError::Timeout(Duration::from_secs(15)).to_string();
        let silence = ConnectionError::ServerTimeout(Duration::from_secs(30)).to_string();
        assert!(handshake.starts_with("handshake"));
        assert!(!silence.contains("handshake"));
        assert!(!ConnectionError::ServerTimeout(Duration::ZERO).is_benign());
    }

    #[test]
    fn transport_errors_map_to_connection_errors() {
        assert_eq!(
            ConnectionError::from(TransportError::Unauthorized("401".into())),
            ConnectionError::Unauthorized("401".into())
        );
        assert!(ConnectionError::from(TransportError::Negotiate("no websockets".into())).to_string().contains("no websockets"));
        assert_eq!(
            ConnectionError::from(TransportError::Closed),
            ConnectionError::Transport("transport closed".into())
        );
    }
}
