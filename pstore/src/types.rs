//! Chat and message record types.

use chrono::{DateTime, Utc};
use pcommon::{ChatId, MessageId, UserId};
use pprovider::ProviderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

/// One conversation turn half. Immutable once created; the id and timestamp
/// are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub text: String,
    pub sender: Sender,
    pub ai: ProviderId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A persisted conversation thread owned by one identity and bound to one
/// provider. `message_count` tracks the number of messages with this chat's
/// id; the store maintains it on every append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub title: String,
    pub user_id: UserId,
    pub ai_provider: ProviderId,
    pub message_count: u32,
    pub last_message: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Sender::Ai).unwrap(), "\"ai\"");
    }

    #[test]
    fn provider_tag_serializes_as_route_segment() {
        assert_eq!(
            serde_json::to_string(&ProviderId::ChatGpt).unwrap(),
            "\"chatgpt\""
        );
    }
}
