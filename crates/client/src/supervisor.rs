//! Owns the single shared hub connection.
//!
//! There is at most one live handle per supervisor and at most one connection
//! attempt in flight. Concurrent [`Supervisor::ensure_connected`] calls join
//! the attempt already running instead of starting another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::credentials::CredentialSource;
use crate::dispatcher::EventDispatcher;
use crate::error::ConnectionError;
use crate::session::{Session, SessionCommand, SessionSettings};
use crate::sink::EventSink;
use crate::state::{ConnectionSnapshot, ConnectionState};
use crate::transport::{ConnectRequest, Connector, TransportLink};

type PendingConnect = Shared<BoxFuture<'static, Result<ConnectionInfo, ConnectionError>>>;

/// Identity of an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub handle_id: u64,
    pub connection_id: String,
}

struct SessionHandle {
    handle_id: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn stop(self) {
        let _ = self.stop.send(());
    }

    /// Stop the session and wait until its transport is released.
    async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

struct InFlight {
    handle_id: u64,
    pending: PendingConnect,
    abort: AbortHandle,
}

#[derive(Default)]
struct Slot {
    session: Option<SessionHandle>,
    connecting: Option<InFlight>,
    attempt_sequence: u64,
    consumers: usize,
}

pub(crate) struct SupervisorCore {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    sink: Arc<dyn EventSink>,
    settings: SessionSettings,
    slot: Mutex<Slot>,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

impl SupervisorCore {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, update: impl FnOnce(&mut ConnectionSnapshot)) {
        self.snapshot.send_modify(update);
    }

    fn is_current(slot: &Slot, handle_id: u64) -> bool {
        slot.session
            .as_ref()
            .is_some_and(|session| session.handle_id == handle_id)
    }

    /// Start a new attempt. Must be called with the slot locked.
    fn start_attempt(self: &Arc<Self>, slot: &mut Slot) -> Result<PendingConnect, ConnectionError> {
        if !self.credentials.is_authenticated() {
            debug!("no credential available, not connecting");
            self.publish(|s| {
                s.state = ConnectionState::Disconnected;
                s.last_error = Some(ConnectionError::NotAuthenticated);
            });
            return Err(ConnectionError::NotAuthenticated);
        }

        if let Some(stale) = slot.session.take() {
            warn!(handle_id = stale.handle_id, "replacing stale hub session");
            stale.stop();
        }

        slot.attempt_sequence += 1;
        let handle_id = slot.attempt_sequence;
        self.publish(|s| {
            s.state = ConnectionState::Connecting;
            s.attempt_sequence = handle_id;
            s.handle_id = None;
            s.connection_id = None;
            s.reconnect_attempt = 0;
        });
        info!(handle_id, "connecting to hub");

        let task = tokio::spawn(Self::connect(Arc::clone(self), handle_id));
        let abort = task.abort_handle();
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(ConnectionError::Stopped),
                Err(e) => Err(ConnectionError::Transport(format!("connection task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        slot.connecting = Some(InFlight {
            handle_id,
            pending: pending.clone(),
            abort,
        });
        Ok(pending)
    }

    async fn connect(core: Arc<Self>, handle_id: u64) -> Result<ConnectionInfo, ConnectionError> {
        let timeout = core.settings.handshake_timeout;
        let outcome = match core.credentials.token() {
            None => Err(ConnectionError::NotAuthenticated),
            Some(token) => {
                let request = ConnectRequest::new(Some(token));
                match tokio::time::timeout(timeout, core.connector.connect(request)).await {
                    Ok(result) => result.map_err(ConnectionError::from),
                    Err(_) => Err(ConnectionError::Timeout(timeout)),
                }
            }
        };
        core.finish_attempt(handle_id, outcome)
    }

    fn finish_attempt(
        self: &Arc<Self>,
        handle_id: u64,
        outcome: Result<TransportLink, ConnectionError>,
    ) -> Result<ConnectionInfo, ConnectionError> {
        let mut slot = self.lock_slot();
        if !matches!(&slot.connecting, Some(in_flight) if in_flight.handle_id == handle_id) {
            debug!(handle_id, "connection attempt superseded, discarding");
            return Err(ConnectionError::Stopped);
        }
        slot.connecting = None;

        let link = match outcome {
            Ok(link) => link,
            Err(error) => {
                if error.is_benign() {
                    debug!(handle_id, error = %error, "hub connection attempt ended");
                } else {
                    warn!(handle_id, error = %error, "hub connection failed");
                }
                self.publish(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.last_error = Some(error.clone());
                });
                return Err(error);
            }
        };

        let connection_id = link.connection_id.clone();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let session = Session::new(
            handle_id,
            Arc::downgrade(self),
            self.connector.clone(),
            self.credentials.clone(),
            self.settings.clone(),
            EventDispatcher::new(self.sink.clone(), self.settings.typing_window),
        );
        let task = tokio::spawn(session.run(link, commands_rx, stop_rx));

        slot.session = Some(SessionHandle {
            handle_id,
            commands: commands_tx,
            stop: stop_tx,
            task,
        });
        self.publish(|s| {
            s.state = ConnectionState::Connected;
            s.handle_id = Some(handle_id);
            s.connection_id = Some(connection_id.clone());
            s.reconnect_attempt = 0;
            s.last_error = None;
        });
        info!(handle_id, %connection_id, "hub connected");

        Ok(ConnectionInfo {
            handle_id,
            connection_id,
        })
    }

    /// Drop the current handle and any attempt in flight.
    fn detach(&self, slot: &mut Slot) -> Option<SessionHandle> {
        let connecting = slot.connecting.take();
        let session = slot.session.take();
        if connecting.is_none() && session.is_none() {
            return None;
        }

        if let Some(in_flight) = connecting {
            debug!(handle_id = in_flight.handle_id, "abandoning hub connection attempt");
            in_flight.abort.abort();
        }
        self.publish(|s| {
            s.state = ConnectionState::Disconnected;
            s.handle_id = None;
            s.connection_id = None;
            s.reconnect_attempt = 0;
        });
        info!("hub connection torn down");
        session
    }

    pub(crate) fn on_reconnecting(&self, handle_id: u64, attempt: u32, error: &ConnectionError) {
        let slot = self.lock_slot();
        if !Self::is_current(&slot, handle_id) {
            return;
        }
        self.publish(|s| {
            s.state = ConnectionState::Reconnecting;
            s.connection_id = None;
            s.reconnect_attempt = attempt;
            s.last_error = Some(error.clone());
        });
    }

    pub(crate) fn on_reconnected(&self, handle_id: u64, connection_id: &str) {
        let slot = self.lock_slot();
        if !Self::is_current(&slot, handle_id) {
            return;
        }
        self.publish(|s| {
            s.state = ConnectionState::Connected;
            s.connection_id = Some(connection_id.to_string());
            s.reconnect_attempt = 0;
            s.last_error = None;
        });
        info!(handle_id, connection_id, "hub reconnected");
    }

    /// The session ended on its own. Clears the slot only if it still holds
    /// this handle.
    pub(crate) fn on_closed(&self, handle_id: u64, error: Option<ConnectionError>) {
        let mut slot = self.lock_slot();
        if !Self::is_current(&slot, handle_id) {
            debug!(handle_id, "stale session closed");
            return;
        }
        slot.session = None;
        match &error {
            Some(error) => warn!(handle_id, error = %error, "hub connection closed"),
            None => info!(handle_id, "hub connection closed"),
        }
        self.publish(|s| {
            s.state = ConnectionState::Disconnected;
            s.handle_id = None;
            s.connection_id = None;
            s.reconnect_attempt = 0;
            s.last_error = error;
        });
    }
}

enum Step {
    Join(PendingConnect),
    /// A built-in reconnect is running; wait for it to settle.
    Wait,
}

/// Process-wide owner of the hub connection. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    core: Arc<SupervisorCore>,
}

impl Supervisor {
    pub fn new(
        config: &HubConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot::default());
        Self {
            core: Arc::new(SupervisorCore {
                connector,
                credentials,
                sink,
                settings: SessionSettings::from(config),
                slot: Mutex::new(Slot::default()),
                snapshot,
            }),
        }
    }

    /// Return the connected handle, joining or starting a connection attempt
    /// as needed.
    ///
    /// While a built-in reconnect is running this waits for it to finish
    /// instead of racing it with a second transport.
    pub async fn ensure_connected(&self) -> Result<ConnectionInfo, ConnectionError> {
        loop {
            let mut changes = self.core.snapshot.subscribe();
            let step = {
                let mut slot = self.core.lock_slot();
                let snapshot = self.core.snapshot.borrow().clone();
                let live = slot.session.as_ref().map(|session| session.handle_id);
                let joinable = slot.connecting.as_ref().map(|f| f.pending.clone());
                match (live, joinable) {
                    (Some(handle_id), _) if snapshot.state.is_connected() => {
                        debug!(handle_id, "reusing hub connection");
                        return Ok(ConnectionInfo {
                            handle_id,
                            connection_id: snapshot.connection_id.unwrap_or_default(),
                        });
                    }
                    (Some(_), _) if snapshot.state == ConnectionState::Reconnecting => Step::Wait,
                    (_, Some(pending)) => Step::Join(pending),
                    _ => Step::Join(self.core.start_attempt(&mut slot)?),
                }
            };

            match step {
                Step::Join(pending) => return pending.await,
                Step::Wait => {
                    if changes.changed().await.is_err() {
                        return Err(ConnectionError::Stopped);
                    }
                }
            }
        }
    }

    /// Stop the connection and wait until the transport is released.
    /// Idempotent.
    pub async fn teardown(&self) {
        let session = {
            let mut slot = self.core.lock_slot();
            self.core.detach(&mut slot)
        };
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    /// Register a consumer. The connection is torn down when the last guard
    /// is dropped.
    pub fn acquire(&self) -> ConsumerGuard {
        self.core.lock_slot().consumers += 1;
        ConsumerGuard {
            supervisor: self.clone(),
        }
    }

    pub fn consumers(&self) -> usize {
        self.core.lock_slot().consumers
    }

    fn release(&self) {
        let session = {
            let mut slot = self.core.lock_slot();
            slot.consumers = slot.consumers.saturating_sub(1);
            if slot.consumers > 0 {
                return;
            }
            debug!("last hub consumer released");
            self.core.detach(&mut slot)
        };
        if let Some(session) = session {
            session.stop();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.snapshot.borrow().state
    }

    /// Server-assigned id of the live transport.
    pub fn connection_id(&self) -> Option<String> {
        self.core.snapshot.borrow().connection_id.clone()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.core.snapshot.borrow().clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.core.snapshot.subscribe()
    }

    /// Command channel of the connected session, or the state that prevents
    /// sending.
    pub(crate) fn session_sender(
        &self,
    ) -> Result<mpsc::UnboundedSender<SessionCommand>, ConnectionState> {
        let slot = self.core.lock_slot();
        let state = self.core.snapshot.borrow().state;
        match &slot.session {
            Some(session) if state.is_connected() => Ok(session.commands.clone()),
            _ => Err(state),
        }
    }
}

/// Keeps the connection wanted while alive.
pub struct ConsumerGuard {
    supervisor: Supervisor,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.supervisor.release();
    }
}
