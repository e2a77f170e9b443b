//! JSON hub protocol (version 1) framing and messages.
//!
//! Every record is a JSON object terminated by the ASCII record separator
//! `0x1E`. A connection starts with a handshake request/response pair, after
//! which both sides exchange typed messages:
//!
//! | type | message       |
//! |------|---------------|
//! | 1    | Invocation    |
//! | 3    | Completion    |
//! | 6    | Ping          |
//! | 7    | Close         |
//!
//! Streaming types (2, 4, 5) and newer extensions are surfaced as
//! [`HubMessage::Other`] and ignored by the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Terminator of every record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

#[derive(Debug, Serialize)]
struct HandshakeRequest {
    protocol: &'static str,
    version: u32,
}

/// The server's answer to the handshake request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// The framed handshake request the client sends first.
pub fn handshake_request() -> String {
    let request = HandshakeRequest {
        protocol: PROTOCOL_NAME,
        version: PROTOCOL_VERSION,
    };
    // Serializing a struct of a str and an integer cannot fail
    let mut text = serde_json::to_string(&request).unwrap_or_default();
    text.push(RECORD_SEPARATOR);
    text
}

/// Parse the handshake response at the start of `text`.
///
/// Returns whatever followed the handshake record in the same frame; servers
/// are allowed to batch the first messages behind it.
pub fn parse_handshake_response(text: &str) -> Result<&str, ProtocolError> {
    let (record, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or(ProtocolError::IncompleteHandshake)?;
    let response: HandshakeResponse =
        serde_json::from_str(record).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(rest),
    }
}

/// A single hub-protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method on the peer. Without an invocation id no completion is
    /// expected.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    /// The server is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// A message type this client does not act on.
    Other(u8),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl WireMessage {
    fn of_kind(kind: u8) -> Self {
        Self {
            kind,
            invocation_id: None,
            target: None,
            arguments: None,
            result: None,
            error: None,
            allow_reconnect: None,
        }
    }
}

impl HubMessage {
    /// An invocation that expects a completion with the given id.
    pub fn invocation(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        HubMessage::Invocation {
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
        }
    }

    /// A non-blocking invocation; the server sends no completion.
    pub fn send(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    /// Serialize as one framed record.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let wire = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => WireMessage {
                invocation_id: invocation_id.clone(),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..WireMessage::of_kind(TYPE_INVOCATION)
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => WireMessage {
                invocation_id: Some(invocation_id.clone()),
                result: result.clone(),
                error: error.clone(),
                ..WireMessage::of_kind(TYPE_COMPLETION)
            },
            HubMessage::Ping => WireMessage::of_kind(TYPE_PING),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => WireMessage {
                error: error.clone(),
                allow_reconnect: Some(*allow_reconnect),
                ..WireMessage::of_kind(TYPE_CLOSE)
            },
            HubMessage::Other(kind) => WireMessage::of_kind(*kind),
        };
        let mut text =
            serde_json::to_string(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        text.push(RECORD_SEPARATOR);
        Ok(text)
    }

    /// Parse a single record (without its separator).
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage =
            serde_json::from_str(record).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let message = match wire.kind {
            TYPE_INVOCATION => HubMessage::Invocation {
                invocation_id: wire.invocation_id,
                target: wire.target.ok_or(ProtocolError::MissingField {
                    kind: TYPE_INVOCATION,
                    field: "target",
                })?,
                arguments: wire.arguments.unwrap_or_default(),
            },
            TYPE_COMPLETION => HubMessage::Completion {
                invocation_id: wire.invocation_id.ok_or(ProtocolError::MissingField {
                    kind: TYPE_COMPLETION,
                    field: "invocationId",
                })?,
                result: wire.result,
                error: wire.error,
            },
            TYPE_PING => HubMessage::Ping,
            TYPE_CLOSE => HubMessage::Close {
                error: wire.error,
                allow_reconnect: wire.allow_reconnect.unwrap_or(false),
            },
            other => HubMessage::Other(other),
        };
        Ok(message)
    }
}

/// Split a transport frame into its non-empty records.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

/// Parse every record in a transport frame.
pub fn decode_frame(text: &str) -> Vec<Result<HubMessage, ProtocolError>> {
    split_records(text).map(HubMessage::parse).collect()
}
