//! In-memory conversation store.
//!
//! Holds messages per conversation (sorted by `created_at`) and the set of
//! users currently typing. It is the default [`EventSink`]; UI layers read
//! from it and seed it with history fetched elsewhere.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hubline_shared::{ConversationId, MessageDto, MessageId, ReactionSummary, UserId};

use crate::sink::EventSink;

/// Messages for a single conversation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationMessages {
    /// All known messages, sorted by created_at ascending.
    pub messages: Vec<MessageDto>,
    /// Whether history has been loaded for this conversation.
    pub is_loaded: bool,
}

impl ConversationMessages {
    /// Add a message, maintaining sort order by created_at.
    /// Returns false if a message with the same id already exists.
    pub fn add_message(&mut self, message: MessageDto) -> bool {
        if self.contains(message.id) {
            return false;
        }

        let pos = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
        true
    }

    /// Replace the whole history and mark the conversation as loaded.
    /// When an id appears more than once the last copy wins.
    pub fn set_history(&mut self, messages: Vec<MessageDto>) {
        let mut seen = HashSet::new();
        let mut messages: Vec<MessageDto> = messages
            .into_iter()
            .rev()
            .filter(|m| seen.insert(m.id))
            .collect();
        messages.reverse();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.messages = messages;
        self.is_loaded = true;
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    pub fn get(&self, message_id: MessageId) -> Option<&MessageDto> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Returns false if the message is unknown.
    pub fn replace_reactions(
        &mut self,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    ) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.reactions = reactions;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: HashMap<ConversationId, ConversationMessages>,
    /// Typing users per conversation: user id -> display name.
    typing: HashMap<ConversationId, BTreeMap<UserId, String>>,
}

/// Thread-safe store shared between the connection task and readers.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    state: Arc<RwLock<StoreState>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a conversation, if anything is known about it.
    pub fn conversation(&self, conversation_id: ConversationId) -> Option<ConversationMessages> {
        self.read().conversations.get(&conversation_id).cloned()
    }

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<MessageDto> {
        self.read()
            .conversations
            .get(&conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn message(&self, conversation_id: ConversationId, message_id: MessageId) -> Option<MessageDto> {
        self.read()
            .conversations
            .get(&conversation_id)
            .and_then(|c| c.get(message_id).cloned())
    }

    pub fn set_history(&self, conversation_id: ConversationId, messages: Vec<MessageDto>) {
        self.write()
            .conversations
            .entry(conversation_id)
            .or_default()
            .set_history(messages);
    }

    /// Users currently typing in a conversation, as (user id, display name).
    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<(UserId, String)> {
        self.read()
            .typing
            .get(&conversation_id)
            .map(|users| {
                users
                    .iter()
                    .map(|(id, name)| (id.clone(), name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop everything (logout).
    pub fn clear(&self) {
        let mut state = self.write();
        state.conversations.clear();
        state.typing.clear();
    }
}

impl EventSink for MessageStore {
    fn contains_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.read()
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.contains(message_id))
    }

    fn append_message(&self, message: MessageDto) {
        let mut state = self.write();
        if let Some(typing) = state.typing.get_mut(&message.conversation_id) {
            typing.remove(&message.sender_id);
        }
        state
            .conversations
            .entry(message.conversation_id)
            .or_default()
            .add_message(message);
    }

    fn typing_started(&self, conversation_id: ConversationId, user_id: &str, display_name: &str) {
        self.write()
            .typing
            .entry(conversation_id)
            .or_default()
            .insert(user_id.to_string(), display_name.to_string());
    }

    fn typing_stopped(&self, conversation_id: ConversationId, user_id: &str) {
        let mut state = self.write();
        if let Some(typing) = state.typing.get_mut(&conversation_id) {
            typing.remove(user_id);
            if typing.is_empty() {
                state.typing.remove(&conversation_id);
            }
        }
    }

    fn replace_reactions(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    ) {
        if let Some(conversation) = self.write().conversations.get_mut(&conversation_id) {
            conversation.replace_reactions(message_id, reactions);
        }
    }
}
