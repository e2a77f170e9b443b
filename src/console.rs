//! Terminal rendering of hub events.

use hubline_client::{EventSink, MessageStore};
use hubline_shared::{ConversationId, MessageDto, MessageId, ReactionSummary};

/// Prints events for the watched conversation and keeps the full state in a
/// [`MessageStore`].
pub struct ConsoleSink {
    store: MessageStore,
    conversation_id: ConversationId,
}

impl ConsoleSink {
    pub fn new(store: MessageStore, conversation_id: ConversationId) -> Self {
        Self {
            store,
            conversation_id,
        }
    }

    fn watching(&self, conversation_id: ConversationId) -> bool {
        conversation_id == self.conversation_id
    }
}

impl EventSink for ConsoleSink {
    fn contains_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.store.contains_message(conversation_id, message_id)
    }

    fn append_message(&self, message: MessageDto) {
        if self.watching(message.conversation_id) {
            let sender = message
                .sender_display_name
                .as_deref()
                .unwrap_or(&message.sender_id);
            println!(
                "[{}] #{} {}: {}",
                message.created_at.format("%H:%M:%S"),
                message.id,
                sender,
                message.content
            );
        }
        self.store.append_message(message);
    }

    fn typing_started(&self, conversation_id: ConversationId, user_id: &str, display_name: &str) {
        self.store
            .typing_started(conversation_id, user_id, display_name);
        if self.watching(conversation_id) {
            println!("  {display_name} is typing...");
        }
    }

    fn typing_stopped(&self, conversation_id: ConversationId, user_id: &str) {
        self.store.typing_stopped(conversation_id, user_id);
    }

    fn replace_reactions(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    ) {
        if self.watching(conversation_id) {
            let summary: Vec<String> = reactions
                .iter()
                .map(|r| format!("{} {}", r.emoji, r.count))
                .collect();
            println!("  #{message_id} reactions: {}", summary.join("  "));
        }
        self.store
            .replace_reactions(conversation_id, message_id, reactions);
    }
}
