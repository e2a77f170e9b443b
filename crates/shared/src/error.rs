//! Shared error types for the wire schema and hub protocol.

use thiserror::Error;

/// Failure to read or write a hub-protocol record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The record is not valid JSON or does not match the message shape.
    #[error("malformed hub message: {0}")]
    Malformed(String),

    /// A known message type is missing a required field.
    #[error("hub message type {kind} is missing `{field}`")]
    MissingField { kind: u8, field: &'static str },

    /// The handshake response was never terminated by a record separator.
    #[error("incomplete handshake response")]
    IncompleteHandshake,

    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("failed to encode hub message: {0}")]
    Encode(String),
}

/// Failure to turn invocation arguments into a typed event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("`{target}` is missing argument {index}")]
    MissingArgument { target: &'static str, index: usize },

    #[error("`{target}` argument {index} is invalid: {reason}")]
    InvalidArgument {
        target: &'static str,
        index: usize,
        reason: String,
    },
}
