//! Routes server pushes into the [`EventSink`].
//!
//! One dispatcher is built per logical connection and lives inside its
//! session task, so handlers exist exactly once no matter how many times the
//! transport reconnects underneath.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hubline_shared::{ConversationId, InboundEvent, UserId};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::sink::EventSink;

/// What happened to one inbound invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded to the sink.
    Delivered,
    /// The message was already known.
    Duplicate,
    /// A typing notification inside the throttle window.
    Throttled,
    /// Target this client does not handle.
    Ignored,
    /// Arguments could not be decoded.
    Malformed,
}

/// Collapses repeated typing notifications per (conversation, user).
#[derive(Debug)]
struct TypingThrottle {
    window: Duration,
    last_forwarded: HashMap<(ConversationId, UserId), Instant>,
}

impl TypingThrottle {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_forwarded: HashMap::new(),
        }
    }

    fn admit(&mut self, conversation_id: ConversationId, user_id: &str, now: Instant) -> bool {
        if self.last_forwarded.len() > 256 {
            let window = self.window;
            self.last_forwarded
                .retain(|_, at| now.saturating_duration_since(*at) < window);
        }

        let key = (conversation_id, user_id.to_string());
        match self.last_forwarded.get(&key) {
            Some(at) if now.saturating_duration_since(*at) < self.window => false,
            _ => {
                self.last_forwarded.insert(key, now);
                true
            }
        }
    }

    fn reset(&mut self, conversation_id: ConversationId, user_id: &str) {
        self.last_forwarded
            .remove(&(conversation_id, user_id.to_string()));
    }
}

pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    typing: TypingThrottle,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>, typing_window: Duration) -> Self {
        Self {
            sink,
            typing: TypingThrottle::new(typing_window),
        }
    }

    /// Decode and route a raw invocation.
    pub fn on_invocation(&mut self, target: &str, arguments: &[Value]) -> Dispatch {
        match InboundEvent::decode(target, arguments) {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => {
                debug!(target, "ignoring unhandled hub invocation");
                Dispatch::Ignored
            }
            Err(e) => {
                warn!(target, error = %e, "dropping malformed hub event");
                Dispatch::Malformed
            }
        }
    }

    pub fn dispatch(&mut self, event: InboundEvent) -> Dispatch {
        match event {
            InboundEvent::MessageReceived {
                conversation_id,
                message_id,
                payload,
            } => {
                if self.sink.contains_message(conversation_id, message_id) {
                    debug!(conversation_id, message_id, "duplicate message dropped");
                    return Dispatch::Duplicate;
                }
                // A new message ends its sender's typing burst
                self.typing.reset(conversation_id, &payload.sender_id);
                self.sink.append_message(payload);
                Dispatch::Delivered
            }
            InboundEvent::TypingStarted {
                conversation_id,
                user_id,
                display_name,
            } => {
                if !self.typing.admit(conversation_id, &user_id, Instant::now()) {
                    return Dispatch::Throttled;
                }
                self.sink
                    .typing_started(conversation_id, &user_id, &display_name);
                Dispatch::Delivered
            }
            InboundEvent::TypingStopped {
                conversation_id,
                user_id,
            } => {
                self.typing.reset(conversation_id, &user_id);
                self.sink.typing_stopped(conversation_id, &user_id);
                Dispatch::Delivered
            }
            InboundEvent::ReactionsUpdated {
                message_id,
                conversation_id,
                reactions,
            } => {
                self.sink
                    .replace_reactions(conversation_id, message_id, reactions);
                Dispatch::Delivered
            }
        }
    }
}
