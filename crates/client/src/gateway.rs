//! Outbound hub operations.
//!
//! Every operation requires a connected session and fails immediately with
//! [`CommandError::NotReady`] otherwise; nothing is queued for later.

use std::time::Duration;

use hubline_shared::{
    ConversationId, MarkReadDto, MessageDto, OutboundCommand, SendMessageDto, ToggleReactionDto,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::session::SessionCommand;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct CommandGateway {
    supervisor: Supervisor,
    invocation_timeout: Duration,
}

impl CommandGateway {
    pub fn new(supervisor: Supervisor, invocation_timeout: Duration) -> Self {
        Self {
            supervisor,
            invocation_timeout,
        }
    }

    /// Subscribe to a conversation's events. Server-side failures are logged
    /// and not returned.
    pub async fn join_conversation(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.invoke_tolerant(OutboundCommand::JoinConversation { conversation_id })
            .await
    }

    pub async fn leave_conversation(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.invoke_tolerant(OutboundCommand::LeaveConversation { conversation_id })
            .await
    }

    /// Send a message. Returns the persisted message when the hub echoes it
    /// back as the invocation result.
    pub async fn send_message(&self, dto: SendMessageDto) -> Result<Option<MessageDto>, CommandError> {
        let result = self.invoke(OutboundCommand::SendMessage { dto }).await?;
        Ok(result.and_then(|value| match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "SendMessage result is not a message");
                None
            }
        }))
    }

    pub fn start_typing(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.notify(OutboundCommand::StartTyping { conversation_id })
    }

    pub fn stop_typing(&self, conversation_id: ConversationId) -> Result<(), CommandError> {
        self.notify(OutboundCommand::StopTyping { conversation_id })
    }

    pub async fn toggle_reaction(&self, dto: ToggleReactionDto) -> Result<(), CommandError> {
        self.invoke(OutboundCommand::ToggleReaction { dto })
            .await
            .map(|_| ())
    }

    pub async fn mark_messages_as_read(&self, dto: MarkReadDto) -> Result<(), CommandError> {
        self.invoke(OutboundCommand::MarkRead { dto }).await.map(|_| ())
    }

    /// Check readiness and encode, before anything touches the transport.
    fn prepare(
        &self,
        command: &OutboundCommand,
    ) -> Result<(tokio::sync::mpsc::UnboundedSender<SessionCommand>, Vec<Value>), CommandError> {
        let target = command.target();
        let session = self
            .supervisor
            .session_sender()
            .map_err(|state| CommandError::NotReady { state })?;
        let arguments = command.arguments().map_err(|e| CommandError::Encode {
            target,
            reason: e.to_string(),
        })?;
        Ok((session, arguments))
    }

    async fn invoke(&self, command: OutboundCommand) -> Result<Option<Value>, CommandError> {
        let target = command.target();
        let (session, arguments) = self.prepare(&command)?;

        let (reply, completion) = oneshot::channel();
        session
            .send(SessionCommand::Invoke {
                target,
                arguments,
                reply,
            })
            .map_err(|_| CommandError::ConnectionClosed { target })?;

        match tokio::time::timeout(self.invocation_timeout, completion).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommandError::ConnectionClosed { target }),
            Err(_) => {
                warn!(target, conversation_id = command.conversation_id(), "hub did not acknowledge invocation in time");
                Err(CommandError::Timeout {
                    target,
                    timeout: self.invocation_timeout,
                })
            }
        }
    }

    /// Like `invoke` but only readiness failures reach the caller.
    async fn invoke_tolerant(&self, command: OutboundCommand) -> Result<(), CommandError> {
        let target = command.target();
        let conversation_id = command.conversation_id();
        match self.invoke(command).await {
            Ok(_) => Ok(()),
            Err(error @ CommandError::NotReady { .. }) => Err(error),
            Err(error) => {
                warn!(target, conversation_id, error = %error, "membership change failed");
                Ok(())
            }
        }
    }

    fn notify(&self, command: OutboundCommand) -> Result<(), CommandError> {
        let target = command.target();
        let (session, arguments) = self.prepare(&command)?;
        if session
            .send(SessionCommand::Send { target, arguments })
            .is_err()
        {
            debug!(target, "notification dropped, session gone");
        }
        Ok(())
    }
}
