//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hubline_client::{
    BackoffSchedule, ConnectionSnapshot, ConnectionState, EventSink, HubClient, HubConfig,
    MemoryConnector, MessageStore, SharedCredentials,
};
use hubline_client::transport::ServerEnd;
use hubline_shared::{ConversationId, MessageDto, MessageId, ReactionSummary};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// One observed sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Appended(ConversationId, MessageId),
    TypingStarted(ConversationId, String),
    TypingStopped(ConversationId, String),
    Reactions(MessageId, usize),
}

/// A [`MessageStore`] that also records every callback.
pub struct RecordingSink {
    pub store: MessageStore,
    calls: Mutex<Vec<SinkCall>>,
    notify: mpsc::UnboundedSender<SinkCall>,
    observed: tokio::sync::Mutex<mpsc::UnboundedReceiver<SinkCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        let (notify, observed) = mpsc::unbounded_channel();
        Self {
            store: MessageStore::new(),
            calls: Mutex::new(Vec::new()),
            notify,
            observed: tokio::sync::Mutex::new(observed),
        }
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call.clone());
        let _ = self.notify.send(call);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait for the next callback.
    pub async fn next_call(&self) -> SinkCall {
        tokio::time::timeout(Duration::from_secs(60), self.observed.lock().await.recv())
            .await
            .expect("sink callback within a minute")
            .expect("sink channel open")
    }

    pub fn appended(&self, message_id: MessageId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SinkCall::Appended(_, id) if *id == message_id))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn contains_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.store.contains_message(conversation_id, message_id)
    }

    fn append_message(&self, message: MessageDto) {
        self.record(SinkCall::Appended(message.conversation_id, message.id));
        self.store.append_message(message);
    }

    fn typing_started(&self, conversation_id: ConversationId, user_id: &str, display_name: &str) {
        self.record(SinkCall::TypingStarted(conversation_id, user_id.to_string()));
        self.store.typing_started(conversation_id, user_id, display_name);
    }

    fn typing_stopped(&self, conversation_id: ConversationId, user_id: &str) {
        self.record(SinkCall::TypingStopped(conversation_id, user_id.to_string()));
        self.store.typing_stopped(conversation_id, user_id);
    }

    fn replace_reactions(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    ) {
        self.record(SinkCall::Reactions(message_id, reactions.len()));
        self.store.replace_reactions(conversation_id, message_id, reactions);
    }
}

/// Route client logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Timers far beyond any test so keep-alives never interfere.
pub fn quiet_config() -> HubConfig {
    HubConfig::new("memory://hub")
        .with_keep_alive_interval(Duration::from_secs(3_600))
        .with_server_timeout(Duration::from_secs(7_200))
        .with_invocation_timeout(Duration::from_secs(5))
        .with_retry_policy(BackoffSchedule::from_millis(&[500, 1_000]))
}

pub struct Harness {
    pub client: HubClient,
    pub connector: MemoryConnector,
    pub credentials: SharedCredentials,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    pub fn with_config(config: HubConfig) -> Self {
        init_tracing();
        let connector = MemoryConnector::new();
        let credentials = SharedCredentials::with_token("token-1");
        let sink = Arc::new(RecordingSink::new());
        let client = HubClient::new(
            &config,
            Arc::new(connector.clone()),
            Arc::new(credentials.clone()),
            sink.clone(),
        );
        Self {
            client,
            connector,
            credentials,
            sink,
        }
    }

    /// Connect and return the server side of the new transport.
    pub async fn connect(&self) -> ServerEnd {
        self.client
            .ensure_connected()
            .await
            .expect("client connects");
        self.connector.accept().await.expect("server end available")
    }

    pub async fn wait_for_state(&self, state: ConnectionState) -> ConnectionSnapshot {
        let mut changes = self.client.subscribe();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(600),
            changes.wait_for(|snapshot| snapshot.state == state),
        )
        .await
        .expect("state reached in time")
        .expect("supervisor alive")
        .clone();
        snapshot
    }
}

pub fn message_json(id: MessageId, conversation_id: ConversationId) -> Value {
    json!({
        "id": id,
        "conversationId": conversation_id,
        "senderId": "u-2",
        "senderDisplayName": "Bo",
        "content": format!("message {id}"),
        "createdAt": "2024-05-01T10:00:00Z"
    })
}
