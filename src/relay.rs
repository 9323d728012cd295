use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::backend::BackendClient;
use crate::error::RelayError;
use crate::platform::{ChatEvent, ChatPlatform, IncomingMessage, SlashCommand};

/// Posted when a command could not be relayed, so the user is not left in silence.
pub const GENERIC_FAILURE_REPLY: &str = "Something went wrong, please try again later.";

const MENTION_REPLY: &str = "Hi there!";

/// Immediate reply for slash commands, sent as part of the socket mode ack.
pub fn command_acknowledgement(command: &SlashCommand) -> Option<String> {
    debug!(
        "Slash command {} from {} with {:?}",
        command.command, command.user_id, command.text
    );
    match command.command.as_str() {
        "/hello-socket-mode" => Some(format!("Hi, <@{}>!", command.user_id)),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Turns chat events into backend calls and posts the results back.
pub struct EventRelay {
    backend: Arc<BackendClient>,
    chat: Arc<dyn ChatPlatform>,
}

impl EventRelay {
    pub fn new(backend: Arc<BackendClient>, chat: Arc<dyn ChatPlatform>) -> Self {
        Self { backend, chat }
    }

    /// Handle one event from the transport. Message failures are handled
    /// here; anything else is returned to the transport, which logs it.
    pub async fn dispatch(&self, event: &Value) -> Result<(), RelayError> {
        match ChatEvent::from_event(event)? {
            ChatEvent::Message(raw) => {
                let _ = self.handle_message(&raw).await;
                Ok(())
            }
            ChatEvent::UserChanged(user) => {
                debug!("Profile update for {}", user.id);
                self.backend.resolve_and_set_display_name(&user).await
            }
            ChatEvent::AppMention { channel } => {
                self.chat.post_message(&channel, MENTION_REPLY).await
            }
            ChatEvent::Ignored(kind) => {
                debug!("Ignoring {} event", kind);
                Ok(())
            }
        }
    }

    /// Relay a message event as a command and post the backend's reply.
    ///
    /// On failure the error is logged by kind and, when the channel is known,
    /// a generic failure reply is posted instead.
    pub async fn handle_message(&self, event: &Value) -> Result<String, RelayError> {
        let result = self.relay_command(event).await;

        if let Err(err) = &result {
            match err {
                RelayError::BackendUnavailable { .. } => {
                    error!("Command not relayed, backend unavailable: {}", err)
                }
                RelayError::MalformedEvent(_) => warn!("Command not relayed: {}", err),
                _ => error!("Command reply could not be posted: {}", err),
            }

            let apologize = matches!(
                err,
                RelayError::BackendUnavailable { .. } | RelayError::MalformedEvent(_)
            );
            let channel = event.get("channel").and_then(Value::as_str);
            if let (true, Some(channel)) = (apologize, channel) {
                if let Err(e) = self.chat.post_message(channel, GENERIC_FAILURE_REPLY).await {
                    warn!("Failed to post failure reply to {}: {}", channel, e);
                }
            }
        }

        result
    }

    async fn relay_command(&self, event: &Value) -> Result<String, RelayError> {
        let message = IncomingMessage::from_event(event)?;
        info!(
            "Command from {} in {}: {}",
            message.user_id, message.channel, message.text
        );

        let reply = self
            .backend
            .submit_command(&message.user_id, &message.text)
            .await?;

        // Slack rejects empty messages.
        if reply.trim().is_empty() {
            debug!("Backend returned an empty reply for {}", message.user_id);
            return Ok(reply);
        }

        self.chat.post_message(&message.channel, &reply).await?;
        Ok(reply)
    }

    /// Push the display name of every workspace member to the backend.
    ///
    /// A failed listing aborts the sync; failures for single users are logged
    /// and the sync carries on.
    pub async fn sync_all_users(&self) -> Result<SyncReport, RelayError> {
        let users = self.chat.list_users().await?;
        let mut report = SyncReport::default();

        for user in &users {
            if !user.is_human() {
                report.skipped += 1;
                continue;
            }
            match self.backend.resolve_and_set_display_name(user).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!("Display name sync failed for {}: {}", user.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "User sync done: {} updated, {} skipped, {} failed",
            report.updated, report.skipped, report.failed
        );
        Ok(report)
    }
}
