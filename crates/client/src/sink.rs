//! Boundary between the dispatcher and whatever holds conversation state.

use hubline_shared::{ConversationId, MessageDto, MessageId, ReactionSummary};

/// Destination for decoded hub events.
///
/// Called from the connection task; implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    /// Whether a message is already known locally.
    fn contains_message(&self, conversation_id: ConversationId, message_id: MessageId) -> bool;

    fn append_message(&self, message: MessageDto);

    fn typing_started(&self, conversation_id: ConversationId, user_id: &str, display_name: &str);

    fn typing_stopped(&self, conversation_id: ConversationId, user_id: &str);

    /// Replace the reaction summary of a message. Unknown messages are ignored.
    fn replace_reactions(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    );
}
