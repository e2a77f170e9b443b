//! hubline client - shared real-time connection to a chat hub
//!
//! One [`HubClient`] owns a single authenticated hub connection for the whole
//! process. It reconnects on its own, deduplicates redelivered messages,
//! throttles typing notices and exposes the hub's commands as async methods.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hubline_client::{HubClient, HubConfig, MessageStore, SharedCredentials};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MessageStore::new();
//! let credentials = SharedCredentials::with_token("jwt");
//! let client = HubClient::websocket(
//!     &HubConfig::from_env(),
//!     Arc::new(credentials),
//!     Arc::new(store.clone()),
//! )?;
//!
//! client.ensure_connected().await?;
//! client.join_conversation(42).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod retry;
mod session;
pub mod sink;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod transport;

use std::sync::Arc;

use hubline_shared::{ConversationId, MarkReadDto, MessageDto, SendMessageDto, ToggleReactionDto};
use tokio::sync::watch;

pub use config::HubConfig;
pub use credentials::{CredentialSource, SharedCredentials};
pub use dispatcher::{Dispatch, EventDispatcher};
pub use error::{CommandError, ConnectionError};
pub use gateway::CommandGateway;
pub use retry::{BackoffSchedule, ExponentialBackoff, RetryPolicy};
pub use sink::EventSink;
pub use state::{ConnectionSnapshot, ConnectionState};
pub use store::{ConversationMessages, MessageStore};
pub use supervisor::{ConnectionInfo, ConsumerGuard, Supervisor};
pub use transport::{Connector, MemoryConnector, TransportError, WebSocketConnector};

/// Consumer-facing entry point: connection lifecycle plus hub commands.
#[derive(Clone)]
pub struct HubClient {
    supervisor: Supervisor,
    gateway: CommandGateway,
}

impl HubClient {
    pub fn new(
        config: &HubConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let supervisor = Supervisor::new(config, connector, credentials, sink);
        let gateway = CommandGateway::new(supervisor.clone(), config.invocation_timeout);
        Self {
            supervisor,
            gateway,
        }
    }

    /// A client speaking to `config.hub_url` over WebSockets.
    pub fn websocket(
        config: &HubConfig,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, TransportError> {
        let connector = WebSocketConnector::new(config)?;
        Ok(Self::new(config, Arc::new(connector), credentials, sink))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    pub async fn ensure_connected(&self) -> Result<ConnectionInfo, ConnectionError> {
        self.supervisor.ensure_connected().await
    }

    pub async fn teardown(&self) {
        self.supervisor.teardown().await
    }

    pub fn acquire(&self) -> ConsumerGuard {
        self.supervisor.acquire()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.supervisor.connection_id()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.supervisor.subscribe()
    }

    pub async fn join_conversation(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.gateway.join_conversation(conversation_id).await
    }

    pub async fn leave_conversation(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.gateway.leave_conversation(conversation_id).await
    }

    pub async fn send_message(&self, dto: SendMessageDto) -> Result<Option<MessageDto>, CommandError> {
        self.gateway.send_message(dto).await
    }

    pub fn start_typing(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.gateway.start_typing(conversation_id)
    }

    pub fn stop_typing(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.gateway.stop_typing(conversation_id)
    }

    pub async fn toggle_reaction(&self, dto: ToggleReactionDto) -> Result<(), CommandError> {
        self.gateway.toggle_reaction(dto).await
    }

    pub async fn mark_messages_as_read(&self, dto: MarkReadDto) -> Result<(), CommandError> {
        self.gateway.mark_messages_as_read(dto).await
    }
}
