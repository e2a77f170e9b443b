//! Transports that carry hub-protocol messages.
//!
//! A [`Connector`] performs one complete connection attempt (negotiation,
//! socket open, protocol handshake) and hands back a [`TransportLink`]: a pair
//! of channels plus the server-assigned connection id. Reconnecting is the
//! session's job, not the transport's.

use async_trait::async_trait;
use hubline_shared::{HubMessage, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, ReceivedInvocation, ServerEnd};
pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server refused the credential (HTTP 401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("negotiation failed: {0}")]
    Negotiate(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(ProtocolError),

    /// The peer went away before the link was established.
    #[error("transport closed")]
    Closed,
}

/// Parameters of a single connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub access_token: Option<String>,
}

impl ConnectRequest {
    pub fn new(access_token: Option<String>) -> Self {
        Self { access_token }
    }
}

/// An established, handshaken connection.
///
/// Dropping the link closes the underlying transport.
#[derive(Debug)]
pub struct TransportLink {
    pub connection_id: String,
    pub outgoing: mpsc::UnboundedSender<HubMessage>,
    pub incoming: mpsc::UnboundedReceiver<HubMessage>,
    tasks: Vec<AbortHandle>,
}

impl TransportLink {
    pub fn new(
        connection_id: impl Into<String>,
        outgoing: mpsc::UnboundedSender<HubMessage>,
        incoming: mpsc::UnboundedReceiver<HubMessage>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            outgoing,
            incoming,
            tasks: Vec::new(),
        }
    }

    /// Abort these tasks when the link is dropped.
    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = AbortHandle>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn send(&self, message: HubMessage) -> Result<(), TransportError> {
        self.outgoing.send(message).map_err(|_| TransportError::Closed)
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError>;
}
