/// Message records and conversation identity
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = u64;
pub type EventId = u64;

/// Routing key of a conversation: a direct-message thread with one peer,
/// or the group chat attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationKey {
    Direct(UserId),
    Event(EventId),
}

/// Message identity: server-assigned, or a local placeholder for an
/// optimistic record that has not been confirmed yet.
///
/// Two messages are considered the same when either id matches; the store
/// rewrites `Local` to `Server` once the send call confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Server(u64),
    Local(Uuid),
}

impl MessageId {
    /// Fresh placeholder id for an optimistic local record
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
}

/// One chat message. Sender display fields are denormalized onto the
/// record so the list can render without a join.
///
/// Never mutated after creation, except for the Local -> Server id
/// rewrite performed by the store when a send is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    /// Authoritative ordering key
    pub sent_at: DateTime<Utc>,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
}

/// The logged-in user, as far as this crate needs to know them: the
/// denormalized sender fields stamped onto optimistic local records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

/// Group-chat membership row, held alongside the open event conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "profile_picture")]
    pub avatar: Option<String>,
}

/// Whether a date separator belongs between two adjacent messages:
/// calendar dates differ, and the first message always gets one.
pub fn needs_date_separator(prev: Option<&Message>, next: &Message) -> bool {
    match prev {
        None => true,
        Some(prev) => prev.sent_at.date_naive() != next.sent_at.date_naive(),
    }
}
