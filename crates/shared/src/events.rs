//! Typed real-time events exchanged with the chat hub.
//!
//! The hub speaks in stringly-named invocations. This module is the only place
//! that knows those names: inbound invocations are decoded into
//! [`InboundEvent`] once at the transport boundary, and outbound operations are
//! expressed as [`OutboundCommand`] values that know their own target and
//! argument list.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DecodeError;
use crate::models::{
    ConversationId, MarkReadDto, MessageDto, MessageId, ReactionSummary, ReactionsUpdate,
    SendMessageDto, ToggleReactionDto, UserId,
};

/// Invocation target names used on the wire.
pub mod targets {
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    pub const USER_IS_TYPING: &str = "UserIsTyping";
    pub const USER_STOPPED_TYPING: &str = "UserStoppedTyping";
    pub const MESSAGE_REACTIONS_UPDATED: &str = "MessageReactionsUpdated";

    pub const JOIN_CONVERSATION: &str = "JoinConversation";
    pub const LEAVE_CONVERSATION: &str = "LeaveConversation";
    pub const SEND_MESSAGE: &str = "SendMessage";
    pub const START_TYPING: &str = "StartTyping";
    pub const STOP_TYPING: &str = "StopTyping";
    pub const TOGGLE_REACTION: &str = "ToggleReaction";
    pub const MARK_MESSAGES_AS_READ: &str = "MarkMessagesAsRead";
}

/// A decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessageReceived {
        conversation_id: ConversationId,
        message_id: MessageId,
        payload: MessageDto,
    },
    TypingStarted {
        conversation_id: ConversationId,
        user_id: UserId,
        display_name: String,
    },
    TypingStopped {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    ReactionsUpdated {
        message_id: MessageId,
        conversation_id: ConversationId,
        reactions: Vec<ReactionSummary>,
    },
}

impl InboundEvent {
    /// Decode an invocation pushed by the server.
    ///
    /// Returns `Ok(None)` for targets this client does not handle.
    pub fn decode(target: &str, arguments: &[Value]) -> Result<Option<Self>, DecodeError> {
        let event = match target {
            targets::RECEIVE_MESSAGE => {
                let payload: MessageDto = arg(targets::RECEIVE_MESSAGE, arguments, 0)?;
                InboundEvent::MessageReceived {
                    conversation_id: payload.conversation_id,
                    message_id: payload.id,
                    payload,
                }
            }
            targets::USER_IS_TYPING => {
                let conversation_id = arg(targets::USER_IS_TYPING, arguments, 0)?;
                let user_id: UserId = arg(targets::USER_IS_TYPING, arguments, 1)?;
                // Older servers omit the display name
                let display_name = opt_arg::<String>(targets::USER_IS_TYPING, arguments, 2)?
                    .unwrap_or_else(|| user_id.clone());
                InboundEvent::TypingStarted {
                    conversation_id,
                    user_id,
                    display_name,
                }
            }
            targets::USER_STOPPED_TYPING => InboundEvent::TypingStopped {
                conversation_id: arg(targets::USER_STOPPED_TYPING, arguments, 0)?,
                user_id: arg(targets::USER_STOPPED_TYPING, arguments, 1)?,
            },
            targets::MESSAGE_REACTIONS_UPDATED => {
                let update = match arguments.first() {
                    Some(Value::Object(_)) => {
                        arg::<ReactionsUpdate>(targets::MESSAGE_REACTIONS_UPDATED, arguments, 0)?
                    }
                    _ => ReactionsUpdate {
                        message_id: arg(targets::MESSAGE_REACTIONS_UPDATED, arguments, 0)?,
                        conversation_id: arg(targets::MESSAGE_REACTIONS_UPDATED, arguments, 1)?,
                        reactions: arg(targets::MESSAGE_REACTIONS_UPDATED, arguments, 2)?,
                    },
                };
                InboundEvent::ReactionsUpdated {
                    message_id: update.message_id,
                    conversation_id: update.conversation_id,
                    reactions: update.reactions,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            InboundEvent::MessageReceived { conversation_id, .. }
            | InboundEvent::TypingStarted { conversation_id, .. }
            | InboundEvent::TypingStopped { conversation_id, .. }
            | InboundEvent::ReactionsUpdated { conversation_id, .. } => *conversation_id,
        }
    }

    /// Wire name of the invocation this event was decoded from.
    pub fn target(&self) -> &'static str {
        match self {
            InboundEvent::MessageReceived { .. } => targets::RECEIVE_MESSAGE,
            InboundEvent::TypingStarted { .. } => targets::USER_IS_TYPING,
            InboundEvent::TypingStopped { .. } => targets::USER_STOPPED_TYPING,
            InboundEvent::ReactionsUpdated { .. } => targets::MESSAGE_REACTIONS_UPDATED,
        }
    }
}

/// A request issued to the server over the active connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    JoinConversation { conversation_id: ConversationId },
    LeaveConversation { conversation_id: ConversationId },
    SendMessage { dto: SendMessageDto },
    StartTyping { conversation_id: ConversationId },
    StopTyping { conversation_id: ConversationId },
    ToggleReaction { dto: ToggleReactionDto },
    MarkRead { dto: MarkReadDto },
}

impl OutboundCommand {
    pub fn target(&self) -> &'static str {
        match self {
            OutboundCommand::JoinConversation { .. } => targets::JOIN_CONVERSATION,
            OutboundCommand::LeaveConversation { .. } => targets::LEAVE_CONVERSATION,
            OutboundCommand::SendMessage { .. } => targets::SEND_MESSAGE,
            OutboundCommand::StartTyping { .. } => targets::START_TYPING,
            OutboundCommand::StopTyping { .. } => targets::STOP_TYPING,
            OutboundCommand::ToggleReaction { .. } => targets::TOGGLE_REACTION,
            OutboundCommand::MarkRead { .. } => targets::MARK_MESSAGES_AS_READ,
        }
    }

    /// Positional invocation arguments.
    pub fn arguments(&self) -> Result<Vec<Value>, serde_json::Error> {
        let value = match self {
            OutboundCommand::JoinConversation { conversation_id }
            | OutboundCommand::LeaveConversation { conversation_id }
            | OutboundCommand::StartTyping { conversation_id }
            | OutboundCommand::StopTyping { conversation_id } => Value::from(*conversation_id),
            OutboundCommand::SendMessage { dto } => serde_json::to_value(dto)?,
            OutboundCommand::ToggleReaction { dto } => serde_json::to_value(dto)?,
            OutboundCommand::MarkRead { dto } => serde_json::to_value(dto)?,
        };
        Ok(vec![value])
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            OutboundCommand::JoinConversation { conversation_id }
            | OutboundCommand::LeaveConversation { conversation_id }
            | OutboundCommand::StartTyping { conversation_id }
            | OutboundCommand::StopTyping { conversation_id } => *conversation_id,
            OutboundCommand::SendMessage { dto } => dto.conversation_id,
            OutboundCommand::ToggleReaction { dto } => dto.conversation_id,
            OutboundCommand::MarkRead { dto } => dto.conversation_id,
        }
    }
}

fn arg<T: DeserializeOwned>(
    target: &'static str,
    arguments: &[Value],
    index: usize,
) -> Result<T, DecodeError> {
    let value = arguments
        .get(index)
        .ok_or(DecodeError::MissingArgument { target, index })?;
    T::deserialize(value).map_err(|e| DecodeError::InvalidArgument {
        target,
        index,
        reason: e.to_string(),
    })
}

fn opt_arg<T: DeserializeOwned>(
    target: &'static str,
    arguments: &[Value],
    index: usize,
) -> Result<Option<T>, DecodeError> {
    match arguments.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg(target, arguments, index).map(Some),
    }
}
