//! The task that owns one logical hub connection.
//!
//! A session is spawned once a connection attempt succeeds and lives until it
//! is stopped or gives up reconnecting. It multiplexes:
//!
//! - inbound messages (dispatch, completions, server close),
//! - outbound commands from the gateway,
//! - keep-alive pings and server-timeout detection,
//! - the stop signal from the supervisor,
//! - loss of the credential, which closes the connection.
//!
//! When the transport drops it reconnects under the same handle id, following
//! the configured [`RetryPolicy`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hubline_shared::HubMessage;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::HubConfig;
use crate::credentials::CredentialSource;
use crate::dispatcher::EventDispatcher;
use crate::error::{CommandError, ConnectionError};
use crate::retry::RetryPolicy;
use crate::state::ConnectionState;
use crate::supervisor::SupervisorCore;
use crate::transport::{ConnectRequest, Connector, TransportLink};

pub(crate) type InvocationReply = oneshot::Sender<Result<Option<Value>, CommandError>>;

/// Work handed to the session by the gateway.
pub(crate) enum SessionCommand {
    /// Invocation that expects a completion.
    Invoke {
        target: &'static str,
        arguments: Vec<Value>,
        reply: InvocationReply,
    },
    /// Fire-and-forget invocation.
    Send {
        target: &'static str,
        arguments: Vec<Value>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub handshake_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    pub typing_window: Duration,
    pub retry: Arc<dyn RetryPolicy>,
}

impl From<&HubConfig> for SessionSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout,
            // interval() panics on a zero period
            keep_alive_interval: config.keep_alive_interval.max(Duration::from_millis(1)),
            server_timeout: config.server_timeout,
            typing_window: config.typing_window,
            retry: config.retry.clone(),
        }
    }
}

struct PendingInvocation {
    target: &'static str,
    reply: InvocationReply,
}

/// Why the current transport stopped being usable.
enum LinkEnd {
    /// Deliberate teardown.
    Stopped,
    /// Lost unexpectedly; reconnect.
    Lost(ConnectionError),
    /// Closed by the server without permission to reconnect, with the
    /// server's error if it gave one.
    Closed(Option<ConnectionError>),
}

pub(crate) struct Session {
    handle_id: u64,
    supervisor: Weak<SupervisorCore>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    settings: SessionSettings,
    dispatcher: EventDispatcher,
    pending: HashMap<String, PendingInvocation>,
    next_invocation_id: u64,
}

impl Session {
    pub(crate) fn new(
        handle_id: u64,
        supervisor: Weak<SupervisorCore>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        settings: SessionSettings,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            handle_id,
            supervisor,
            connector,
            credentials,
            settings,
            dispatcher,
            pending: HashMap::new(),
            next_invocation_id: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        link: TransportLink,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let handle_id = self.handle_id;
        let mut link = link;
        let mut credential = self.credentials.subscribe();

        let outcome = loop {
            match self.drive(link, &mut commands, &mut stop, &mut credential).await {
                LinkEnd::Stopped => break None,
                LinkEnd::Closed(error) => {
                    debug!(handle_id, error = ?error, "hub connection ended");
                    break error;
                }
                LinkEnd::Lost(error) => {
                    self.fail_pending();
                    match self
                        .reconnect(error, &mut commands, &mut stop, &mut credential)
                        .await
                    {
                        Ok(next) => link = next,
                        Err(outcome) => break outcome,
                    }
                }
            }
        };

        self.fail_pending();
        debug!(handle_id, "session finished");
        if let Some(core) = self.supervisor.upgrade() {
            core.on_closed(handle_id, outcome);
        }
    }

    /// Pump one transport until it ends. The link is dropped on return.
    async fn drive(
        &mut self,
        mut link: TransportLink,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        stop: &mut oneshot::Receiver<()>,
        credential: &mut Option<watch::Receiver<Option<String>>>,
    ) -> LinkEnd {
        let handle_id = self.handle_id;
        let connection_id = link.connection_id.clone();
        let keep_alive_every = self.settings.keep_alive_interval;
        let server_timeout = self.settings.server_timeout;

        let mut keep_alive =
            tokio::time::interval_at(Instant::now() + keep_alive_every, keep_alive_every);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let silence = tokio::time::sleep(server_timeout);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                _ = &mut *stop => {
                    debug!(handle_id, %connection_id, "session stopped");
                    return LinkEnd::Stopped;
                }
                _ = credential_lost(credential) => {
                    info!(handle_id, %connection_id, "credential cleared, closing hub connection");
                    return LinkEnd::Closed(Some(ConnectionError::NotAuthenticated));
                }
                message = link.incoming.recv() => {
                    let Some(message) = message else {
                        warn!(handle_id, %connection_id, "hub transport lost");
                        return LinkEnd::Lost(ConnectionError::Transport("transport closed".to_string()));
                    };
                    silence.as_mut().reset(Instant::now() + server_timeout);
                    if let Some(end) = self.on_message(&link, message) {
                        return end;
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        return LinkEnd::Stopped;
                    };
                    if let Err(error) = self.write(&link, command) {
                        warn!(handle_id, %connection_id, error = %error, "hub transport rejected a write");
                        return LinkEnd::Lost(error);
                    }
                }
                _ = keep_alive.tick() => {
                    if link.send(HubMessage::Ping).is_err() {
                        return LinkEnd::Lost(ConnectionError::Transport("transport closed".to_string()));
                    }
                }
                _ = &mut silence => {
                    warn!(handle_id, %connection_id, timeout_ms = server_timeout.as_millis() as u64, "no message from hub within server timeout");
                    return LinkEnd::Lost(ConnectionError::ServerTimeout(server_timeout));
                }
            }
        }
    }

    fn on_message(&mut self, link: &TransportLink, message: HubMessage) -> Option<LinkEnd> {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                self.dispatcher.on_invocation(&target, &arguments);
                if let Some(invocation_id) = invocation_id {
                    // Client results are not supported
                    let _ = link.send(HubMessage::Completion {
                        invocation_id,
                        result: None,
                        error: Some("Client did not provide a result.".to_string()),
                    });
                }
                None
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                match self.pending.remove(&invocation_id) {
                    Some(pending) => {
                        let outcome = match error {
                            Some(reason) => Err(CommandError::Rejected {
                                target: pending.target,
                                reason,
                            }),
                            None => Ok(result),
                        };
                        let _ = pending.reply.send(outcome);
                    }
                    None => debug!(%invocation_id, "completion for unknown invocation"),
                }
                None
            }
            HubMessage::Ping => None,
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                if allow_reconnect {
                    let reason = error.unwrap_or_else(|| "server requested a reconnect".to_string());
                    return Some(LinkEnd::Lost(ConnectionError::Closed(reason)));
                }
                Some(LinkEnd::Closed(error.map(ConnectionError::Closed)))
            }
            HubMessage::Other(kind) => {
                trace!(kind, "ignoring hub message");
                None
            }
        }
    }

    fn write(&mut self, link: &TransportLink, command: SessionCommand) -> Result<(), ConnectionError> {
        let closed = || ConnectionError::Transport("transport closed".to_string());
        match command {
            SessionCommand::Invoke {
                target,
                arguments,
                reply,
            } => {
                // Callers that timed out no longer listen
                self.pending.retain(|_, pending| !pending.reply.is_closed());

                self.next_invocation_id += 1;
                let invocation_id = self.next_invocation_id.to_string();
                if link
                    .send(HubMessage::invocation(invocation_id.clone(), target, arguments))
                    .is_err()
                {
                    let _ = reply.send(Err(CommandError::ConnectionClosed { target }));
                    return Err(closed());
                }
                trace!(%invocation_id, target, "invocation sent");
                self.pending
                    .insert(invocation_id, PendingInvocation { target, reply });
            }
            SessionCommand::Send { target, arguments } => {
                link.send(HubMessage::send(target, arguments))
                    .map_err(|_| closed())?;
            }
        }
        Ok(())
    }

    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(CommandError::ConnectionClosed {
                target: pending.target,
            }));
        }
    }

    /// Built-in reconnect loop. `Err(None)` means stopped deliberately.
    async fn reconnect(
        &mut self,
        cause: ConnectionError,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        stop: &mut oneshot::Receiver<()>,
        credential: &mut Option<watch::Receiver<Option<String>>>,
    ) -> Result<TransportLink, Option<ConnectionError>> {
        let handle_id = self.handle_id;
        let mut last_error = cause;
        let mut attempt = 0u32;

        loop {
            let Some(delay) = self.settings.retry.next_delay(attempt) else {
                warn!(handle_id, attempts = attempt, error = %last_error, "giving up on reconnecting");
                return Err(Some(last_error));
            };

            match self.supervisor.upgrade() {
                Some(core) => core.on_reconnecting(handle_id, attempt, &last_error),
                None => return Err(None),
            }
            info!(handle_id, attempt, delay_ms = delay.as_millis() as u64, "reconnecting to hub");

            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut *stop => return Err(None),
                    _ = credential_lost(credential) => {
                        info!(handle_id, "credential gone, abandoning reconnect");
                        return Err(Some(ConnectionError::NotAuthenticated));
                    }
                    _ = &mut wait => break,
                    command = commands.recv() => match command {
                        Some(command) => reject(command),
                        None => return Err(None),
                    },
                }
            }

            let Some(token) = self.credentials.token() else {
                info!(handle_id, "credential gone, abandoning reconnect");
                return Err(Some(ConnectionError::NotAuthenticated));
            };

            let handshake_timeout = self.settings.handshake_timeout;
            let connect = tokio::time::timeout(
                handshake_timeout,
                self.connector.connect(ConnectRequest::new(Some(token))),
            );
            tokio::pin!(connect);
            let result = loop {
                tokio::select! {
                    _ = &mut *stop => return Err(None),
                    _ = credential_lost(credential) => {
                        info!(handle_id, "credential gone, abandoning reconnect");
                        return Err(Some(ConnectionError::NotAuthenticated));
                    }
                    result = &mut connect => break result,
                    command = commands.recv() => match command {
                        Some(command) => reject(command),
                        None => return Err(None),
                    },
                }
            };

            match result {
                Ok(Ok(link)) => {
                    let Some(core) = self.supervisor.upgrade() else {
                        return Err(None);
                    };
                    core.on_reconnected(handle_id, &link.connection_id);
                    return Ok(link);
                }
                Ok(Err(error)) => {
                    last_error = error.into();
                    if last_error.is_auth_failure() {
                        warn!(handle_id, error = %last_error, "hub rejected credential while reconnecting");
                        return Err(Some(last_error));
                    }
                    debug!(handle_id, attempt, error = %last_error, "reconnect attempt failed");
                }
                Err(_) => {
                    last_error = ConnectionError::Timeout(handshake_timeout);
                    debug!(handle_id, attempt, "reconnect attempt timed out");
                }
            }
            attempt += 1;
        }
    }
}

/// Resolves once the credential is gone. Pending forever for sources that
/// cannot report changes.
async fn credential_lost(credential: &mut Option<watch::Receiver<Option<String>>>) {
    if let Some(changes) = credential {
        let sender_gone = changes.wait_for(Option::is_none).await.is_err();
        if !sender_gone {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Commands are not queued across reconnects.
fn reject(command: SessionCommand) {
    match command {
        SessionCommand::Invoke { target, reply, .. } => {
            debug!(target, "rejecting invocation while reconnecting");
            let _ = reply.send(Err(CommandError::NotReady {
                state: ConnectionState::Reconnecting,
            }));
        }
        SessionCommand::Send { target, .. } => {
            debug!(target, "dropping notification while reconnecting");
        }
    }
}
