/// Wire schema for the live socket channel
///
/// Every payload is validated into a strict variant at the subscription
/// boundary; loosely-shaped or unknown events never reach the reconciler.
use crate::error::{ChatError, Result};
use crate::message::{ConversationKey, EventId, Message, MessageId, MessageType, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events delivered by the socket server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum LiveEvent {
    /// A direct message was sent or received
    #[serde(rename = "new_dm")]
    NewDirectMessage { message: DirectMessagePayload },

    /// A message arrived in an event group chat
    #[serde(rename = "new_event_message")]
    NewEventMessage { message: EventMessagePayload },

    /// The peer has viewed our direct messages; clear their unread state
    #[serde(rename = "messages_read")]
    MessagesRead { reader_id: UserId },

    /// A user joined an event group chat
    #[serde(rename = "user_joined_event")]
    ParticipantJoined {
        event_id: EventId,
        user_id: UserId,
        user_name: String,
    },

    /// A user left an event group chat
    #[serde(rename = "user_left_event")]
    ParticipantLeft {
        event_id: EventId,
        user_id: UserId,
        user_name: String,
    },

    /// Session-wide nudge that a direct message arrived somewhere
    #[serde(rename = "new_dm_notification")]
    DirectMessageNotification {
        sender_id: UserId,
        sender_name: String,
    },
}

impl LiveEvent {
    /// Parse a raw socket frame, rejecting anything outside the schema
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ChatError::Protocol(format!("invalid live event: {}", e)))
    }
}

/// Frames the client sends over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to the session user's direct-message room
    JoinDm { user_id: UserId },

    /// Subscribe to an event group chat
    JoinEventChat { event_id: EventId, user_id: UserId },

    /// Unsubscribe from an event group chat
    LeaveEventChat { event_id: EventId },

    /// Presence announce, sent once after the socket comes up
    UserOnline { user_id: UserId },

    /// Echo of a persisted direct message, carrying the confirmed id
    SendDm {
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        message_id: u64,
    },

    /// Echo of a persisted group-chat message
    SendEventMessage {
        event_id: EventId,
        sender_id: UserId,
        content: String,
        message_id: u64,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Direct message as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectMessagePayload {
    pub message_id: u64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
    pub sender_name: String,
    #[serde(default, rename = "sender_picture")]
    pub sender_avatar: Option<String>,
}

impl DirectMessagePayload {
    /// The other participant, from the session user's point of view
    pub fn counterpart(&self, me: UserId) -> UserId {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    pub fn into_message(self, me: UserId) -> Message {
        let peer = self.counterpart(me);
        Message {
            id: MessageId::Server(self.message_id),
            conversation: ConversationKey::Direct(peer),
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            sent_at: self.sent_at,
            sender_name: self.sender_name,
            sender_avatar: self.sender_avatar,
        }
    }
}

/// Group-chat message as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessagePayload {
    pub message_id: u64,
    pub event_id: EventId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
    pub sender_name: String,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default, rename = "sender_picture")]
    pub sender_avatar: Option<String>,
}

impl EventMessagePayload {
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::Server(self.message_id),
            conversation: ConversationKey::Event(self.event_id),
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            sent_at: self.sent_at,
            sender_name: self.sender_name,
            sender_avatar: self.sender_avatar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_dm_frame() {
        let raw = br#"{
            "type": "new_dm",
            "message": {
                "message_id": 42,
                "sender_id": 7,
                "receiver_id": 3,
                "content": "see you at the hostel",
                "message_type": "text",
                "sent_at": "2024-05-02T09:15:00Z",
                "sender_name": "Ana",
                "sender_picture": "uploads/ana.jpg"
            }
        }"#;

        let event = LiveEvent::from_bytes(raw).unwrap();
        match event {
            LiveEvent::NewDirectMessage { message } => {
                assert_eq!(message.message_id, 42);
                assert_eq!(message.counterpart(3), 7);
                assert_eq!(message.counterpart(7), 3);
                let msg = message.into_message(3);
                assert_eq!(msg.conversation, ConversationKey::Direct(7));
                assert_eq!(msg.id, MessageId::Server(42));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parses_membership_frame() {
        let raw = br#"{"type":"user_joined_event","event_id":12,"user_id":5,"user_name":"Budi"}"#;
        let event = LiveEvent::from_bytes(raw).unwrap();
        assert_eq!(
            event,
            LiveEvent::ParticipantJoined {
                event_id: 12,
                user_id: 5,
                user_name: "Budi".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = br#"{"type":"typing_indicator","user_id":5}"#;
        assert!(LiveEvent::from_bytes(raw).is_err());
    }

    #[test]
    fn rejects_malformed_payload() {
        let raw = br#"{"type":"new_dm","message":{"message_id":"not-a-number"}}"#;
        assert!(LiveEvent::from_bytes(raw).is_err());
    }

    #[test]
    fn client_frame_serializes_with_tag() {
        let frame = ClientFrame::JoinEventChat {
            event_id: 12,
            user_id: 3,
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"join_event_chat""#));
        assert!(json.contains(r#""event_id":12"#));
    }
}
