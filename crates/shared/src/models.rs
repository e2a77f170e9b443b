//! Shared data models for the chat hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned conversation identifier.
pub type ConversationId = i64;

/// Server-assigned message identifier, unique within a conversation.
pub type MessageId = i64;

/// Account identifier as issued by the identity backend.
pub type UserId = String;

// --- Messaging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Aggregated reactions of one emoji on one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: u32,
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

/// A message as pushed by the hub (`ReceiveMessage`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub reactions: Vec<ReactionSummary>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    /// Echo of the nonce the sender attached to `SendMessage`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<String>,
}

/// Payload of the `SendMessage` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageDto {
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Client-generated nonce so the sender can match the echoed message.
    pub client_nonce: String,
}

impl SendMessageDto {
    /// A plain text message with a fresh client nonce.
    pub fn new(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            attachments: Vec::new(),
            client_nonce: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_id = Some(message_id);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }
}

/// Payload of the `ToggleReaction` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReactionDto {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub emoji: String,
}

impl ToggleReactionDto {
    pub fn new(conversation_id: ConversationId, message_id: MessageId, emoji: impl Into<String>) -> Self {
        Self {
            message_id,
            conversation_id,
            emoji: emoji.into(),
        }
    }
}

/// Payload of the `MarkMessagesAsRead` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadDto {
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
}

impl MarkReadDto {
    pub fn new(conversation_id: ConversationId, message_ids: Vec<MessageId>) -> Self {
        Self {
            conversation_id,
            message_ids,
        }
    }
}

/// Payload of `MessageReactionsUpdated`: the full, authoritative reaction list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionsUpdate {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub reactions: Vec<ReactionSummary>,
}
