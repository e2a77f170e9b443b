//! In-process transport for tests and simulations.
//!
//! Each successful [`Connector::connect`] yields a [`ServerEnd`] that the test
//! accepts and drives: it sees everything the client sends and can push
//! invocations, completions and close messages back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hubline_shared::HubMessage;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ConnectRequest, Connector, TransportError, TransportLink};

#[derive(Debug, Default)]
struct Behaviour {
    failures: VecDeque<TransportError>,
    latency: Duration,
    requests: Vec<ConnectRequest>,
    attempted_at: Vec<Instant>,
}

#[derive(Debug)]
struct Inner {
    behaviour: Mutex<Behaviour>,
    attempts: AtomicUsize,
    next_session_id: AtomicU64,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

/// A connector whose server side lives in the same process.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                behaviour: Mutex::new(Behaviour::default()),
                attempts: AtomicUsize::new(0),
                next_session_id: AtomicU64::new(1),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            }),
        }
    }

    fn behaviour(&self) -> std::sync::MutexGuard<'_, Behaviour> {
        self.inner
            .behaviour
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next connection attempt fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, error: TransportError) {
        self.behaviour().failures.push_back(error);
    }

    /// Delay every connection attempt by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.behaviour().latency = latency;
    }

    /// Number of connection attempts made, successful or not.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.behaviour().requests.clone()
    }

    /// When each attempt started, on the tokio clock.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.behaviour().attempted_at.clone()
    }

    /// Wait for the next established connection.
    pub async fn accept(&self) -> Option<ServerEnd> {
        self.inner.accepted_rx.lock().await.recv().await
    }

    /// The next established connection, if one is already waiting.
    pub fn try_accept(&self) -> Option<ServerEnd> {
        self.inner.accepted_rx.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let (latency, failure) = {
            let mut behaviour = self.behaviour();
            behaviour.requests.push(request.clone());
            behaviour.attempted_at.push(Instant::now());
            (behaviour.latency, behaviour.failures.pop_front())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let connection_id = format!("mem-{session_id}");

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();

        let server = ServerEnd {
            connection_id: connection_id.clone(),
            access_token: request.access_token,
            to_client: to_client_tx,
            from_client: from_client_rx,
        };
        self.inner
            .accepted_tx
            .send(server)
            .map_err(|_| TransportError::Closed)?;

        Ok(TransportLink::new(connection_id, from_client_tx, to_client_rx))
    }
}

/// An invocation received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedInvocation {
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Vec<Value>,
}

/// Server side of one in-memory connection.
///
/// Dropping it looks like an abrupt network loss to the client.
#[derive(Debug)]
pub struct ServerEnd {
    pub connection_id: String,
    pub access_token: Option<String>,
    to_client: mpsc::UnboundedSender<HubMessage>,
    from_client: mpsc::UnboundedReceiver<HubMessage>,
}

impl ServerEnd {
    /// Push a raw message to the client. Returns false if the client is gone.
    pub fn push(&self, message: HubMessage) -> bool {
        self.to_client.send(message).is_ok()
    }

    /// Invoke a client-side handler.
    pub fn invoke(&self, target: &str, arguments: Vec<Value>) -> bool {
        self.push(HubMessage::send(target, arguments))
    }

    pub fn complete(&self, invocation_id: &str, result: Option<Value>) -> bool {
        self.push(HubMessage::Completion {
            invocation_id: invocation_id.to_string(),
            result,
            error: None,
        })
    }

    pub fn fail(&self, invocation_id: &str, error: &str) -> bool {
        self.push(HubMessage::Completion {
            invocation_id: invocation_id.to_string(),
            result: None,
            error: Some(error.to_string()),
        })
    }

    /// Send a close message and drop the connection.
    pub fn close(self, error: Option<&str>, allow_reconnect: bool) {
        self.push(HubMessage::Close {
            error: error.map(str::to_string),
            allow_reconnect,
        });
    }

    /// Next message from the client, including pings.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.from_client.recv().await
    }

    /// Next invocation from the client, skipping keepalives and completions.
    pub async fn next_invocation(&mut self) -> Option<ReceivedInvocation> {
        loop {
            if let HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } = self.from_client.recv().await?
            {
                return Some(ReceivedInvocation {
                    invocation_id,
                    target,
                    arguments,
                });
            }
        }
    }

    /// Invocations already sent by the client, without waiting.
    pub fn drain_invocations(&mut self) -> Vec<ReceivedInvocation> {
        let mut received = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            if let HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } = message
            {
                received.push(ReceivedInvocation {
                    invocation_id,
                    target,
                    arguments,
                });
            }
        }
        received
    }

    /// Whether the client side has dropped its link.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
