pub mod slack;
pub mod socket_mode;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RelayError;

/// Message subtypes that are not something a user typed.
const IGNORED_MESSAGE_SUBTYPES: &[&str] = &[
    "message_changed",
    "message_deleted",
    "bot_message",
    "channel_join",
];

/// Outbound capabilities the relay needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), RelayError>;

    async fn list_users(&self) -> Result<Vec<UserInfo>, RelayError>;
}

/// A chat message that should be relayed to the backend as a command
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Platform-specific user ID
    pub user_id: String,
    /// Channel the message was posted in; replies go back here
    pub channel: String,
    /// The message text
    pub text: String,
}

impl IncomingMessage {
    pub fn from_event(event: &Value) -> Result<Self, RelayError> {
        let field = |name: &str| {
            event
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    RelayError::MalformedEvent(format!("message event without `{name}`"))
                })
        };

        let user_id = field("user")?;
        if user_id.is_empty() {
            return Err(RelayError::MalformedEvent(
                "message event with empty `user`".to_string(),
            ));
        }

        Ok(Self {
            user_id,
            channel: field("channel")?,
            text: field("text")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: UserProfile,
}

impl UserInfo {
    /// The name shown to the backend: `display_name`, else `real_name`.
    pub fn resolved_display_name(&self) -> Result<&str, RelayError> {
        [&self.profile.display_name, &self.profile.real_name]
            .into_iter()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .ok_or_else(|| RelayError::NoDisplayName(self.id.clone()))
    }

    pub fn is_human(&self) -> bool {
        !self.is_bot && !self.deleted
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SlashCommand {
    pub command: String,
    pub user_id: String,
    #[serde(default)]
    pub text: String,
}

/// An inbound event, classified by what the relay does with it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Raw `message` event; field extraction happens in the relay.
    Message(Value),
    /// `team_join` or `user_change` with the embedded user object.
    UserChanged(UserInfo),
    AppMention { channel: String },
    Ignored(String),
}

impl ChatEvent {
    pub fn from_event(event: &Value) -> Result<Self, RelayError> {
        let kind = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::MalformedEvent("event without `type`".to_string()))?;

        match kind {
            "message" => {
                // Our own replies carry a bot_id.
                let subtype = event.get("subtype").and_then(Value::as_str);
                let ignored_subtype =
                    subtype.is_some_and(|subtype| IGNORED_MESSAGE_SUBTYPES.contains(&subtype));
                if ignored_subtype || event.get("bot_id").is_some() {
                    return Ok(ChatEvent::Ignored("message".to_string()));
                }
                Ok(ChatEvent::Message(event.clone()))
            }
            "team_join" | "user_change" => {
                let user = event.get("user").cloned().ok_or_else(|| {
                    RelayError::MalformedEvent(format!("{kind} event without `user`"))
                })?;
                let user: UserInfo = serde_json::from_value(user)
                    .map_err(|e| RelayError::MalformedEvent(format!("{kind} user: {e}")))?;
                Ok(ChatEvent::UserChanged(user))
            }
            "app_mention" => {
                let channel = event
                    .get("channel")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RelayError::MalformedEvent(
                            "app_mention event without `channel`".to_string(),
                        )
                    })?;
                Ok(ChatEvent::AppMention {
                    channel: channel.to_string(),
                })
            }
            other => Ok(ChatEvent::Ignored(other.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_event_is_extracted() {
        let event = json!({
            "type": "message",
            "user": "U1",
            "text": "LJUVAST",
            "channel": "C1",
            "ts": "1700000000.000100"
        });
        let parsed = ChatEvent::from_event(&event).unwrap();
        assert_eq!(parsed, ChatEvent::Message(event.clone()));

        let message = IncomingMessage::from_event(&event).unwrap();
        assert_eq!(
            message,
            IncomingMessage {
                user_id: "U1".to_string(),
                channel: "C1".to_string(),
                text: "LJUVAST".to_string(),
            }
        );
    }

    #[test]
    fn test_message_without_text_is_malformed() {
        let event = json!({"type": "message", "user": "U1", "channel": "C1"});
        let err = IncomingMessage::from_event(&event).unwrap_err();
        assert!(matches!(err, RelayError::MalformedEvent(ref m) if m.contains("text")));
    }

    #[test]
    fn test_bot_and_subtype_messages_are_ignored() {
        let bot = json!({"type": "message", "bot_id": "B1", "text": "Correct!", "channel": "C1"});
        let edit = json!({"type": "message", "subtype": "message_changed", "channel": "C1"});
        assert_eq!(
            ChatEvent::from_event(&bot).unwrap(),
            ChatEvent::Ignored("message".to_string())
        );
        assert_eq!(
            ChatEvent::from_event(&edit).unwrap(),
            ChatEvent::Ignored("message".to_string())
        );
    }

    #[test]
    fn test_user_authored_subtypes_are_relayed() {
        for subtype in ["file_share", "thread_broadcast"] {
            let event = json!({
                "type": "message",
                "subtype": subtype,
                "user": "U1",
                "text": "LJUVAST",
                "channel": "C1"
            });
            assert_eq!(
                ChatEvent::from_event(&event).unwrap(),
                ChatEvent::Message(event.clone())
            );
        }

        for subtype in IGNORED_MESSAGE_SUBTYPES {
            let event = json!({"type": "message", "subtype": subtype, "channel": "C1"});
            assert_eq!(
                ChatEvent::from_event(&event).unwrap(),
                ChatEvent::Ignored("message".to_string())
            );
        }
    }

    #[test]
    fn test_team_join_and_user_change_carry_user() {
        for kind in ["team_join", "user_change"] {
            let event = json!({
                "type": kind,
                "user": {
                    "id": "U2",
                    "name": "erik",
                    "profile": {"display_name": "", "real_name": "Erik Edin"}
                }
            });
            match ChatEvent::from_event(&event).unwrap() {
                ChatEvent::UserChanged(user) => {
                    assert_eq!(user.id, "U2");
                    assert_eq!(user.resolved_display_name().unwrap(), "Erik Edin");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_user_change_without_user_is_malformed() {
        let event = json!({"type": "user_change"});
        assert!(matches!(
            ChatEvent::from_event(&event),
            Err(RelayError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_app_mention_and_unknown_events() {
        let mention = json!({
            "type": "app_mention",
            "user": "U1",
            "channel": "C9",
            "text": "<@B> hi"
        });
        assert_eq!(
            ChatEvent::from_event(&mention).unwrap(),
            ChatEvent::AppMention {
                channel: "C9".to_string()
            }
        );

        let reaction = json!({"type": "reaction_added"});
        assert_eq!(
            ChatEvent::from_event(&reaction).unwrap(),
            ChatEvent::Ignored("reaction_added".to_string())
        );
    }

    #[test]
    fn test_display_name_resolution() {
        use testing::user;

        assert_eq!(
            user("U1", "erik", "Erik Edin").resolved_display_name().unwrap(),
            "erik"
        );
        assert_eq!(
            user("U1", "", "Erik Edin").resolved_display_name().unwrap(),
            "Erik Edin"
        );
        assert!(matches!(
            user("U1", "", "").resolved_display_name(),
            Err(RelayError::NoDisplayName(_))
        ));
    }

    #[test]
    fn test_user_defaults_when_fields_missing() {
        let user: UserInfo = serde_json::from_value(json!({"id": "U5"})).unwrap();
        assert!(user.is_human());
        assert_eq!(user.profile, UserProfile::default());
    }
}
