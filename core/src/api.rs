/// REST client for the Trafellow backend
///
/// One request per operation, no automatic retry: a failed history or list
/// fetch surfaces as an error state, a failed send leaves the compose box
/// untouched for manual retry.
use crate::conversation_list::ConversationRow;
use crate::error::{ChatError, Result};
use crate::events::{DirectMessagePayload, EventMessagePayload};
use crate::message::{ConversationKey, EventId, Message, MessageType, Participant, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Server confirmation of a persisted message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: u64,
    pub sent_at: DateTime<Utc>,
}

/// The backend operations the session consumes. Behind a trait so tests
/// can substitute an in-memory backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Ordered (ascending by `sent_at`) history page for one conversation
    async fn fetch_history(&self, key: ConversationKey, limit: usize) -> Result<Vec<Message>>;

    /// Denormalized conversation rows, possibly one per message
    async fn fetch_conversations(&self) -> Result<Vec<ConversationRow>>;

    /// Current participant list of an event group chat
    async fn fetch_participants(&self, event_id: EventId) -> Result<Vec<Participant>>;

    /// Persist a direct message; returns the assigned id and timestamp
    async fn send_direct(
        &self,
        receiver_id: UserId,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendReceipt>;

    /// Persist a group-chat message
    async fn send_event(
        &self,
        event_id: EventId,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendReceipt>;
}

// ─── REST implementation ─────────────────────────────────────────────────────

/// Responses arrive wrapped in the backend's `{"data": ...}` envelope
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct EventInfo {
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Serialize)]
struct SendDirectBody<'a> {
    receiver_id: UserId,
    content: &'a str,
    message_type: MessageType,
}

#[derive(Serialize)]
struct SendEventBody<'a> {
    content: &'a str,
    message_type: MessageType,
}

pub struct RestApi {
    http: reqwest::Client,
    base_url: String,
    current_user: UserId,
}

impl RestApi {
    pub fn new(base_url: impl Into<String>, current_user: UserId) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            current_user,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}{}", self.base_url, path);
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| ChatError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChatError::Fetch(e.to_string()))?;
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| ChatError::Fetch(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn post_json<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!("POST {}{}", self.base_url, path);
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Send(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChatError::Send(e.to_string()))?;
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| ChatError::Send(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ChatApi for RestApi {
    async fn fetch_history(&self, key: ConversationKey, limit: usize) -> Result<Vec<Message>> {
        match key {
            ConversationKey::Direct(peer_id) => {
                let rows: Vec<DirectMessagePayload> = self
                    .get_json(&format!("/dm/conversation/{}?limit={}", peer_id, limit))
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|p| p.into_message(self.current_user))
                    .collect())
            }
            ConversationKey::Event(event_id) => {
                let rows: Vec<EventMessagePayload> = self
                    .get_json(&format!("/chat/event/{}?limit={}", event_id, limit))
                    .await?;
                Ok(rows.into_iter().map(|p| p.into_message()).collect())
            }
        }
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationRow>> {
        self.get_json("/dm/conversations").await
    }

    async fn fetch_participants(&self, event_id: EventId) -> Result<Vec<Participant>> {
        let info: EventInfo = self.get_json(&format!("/events/{}", event_id)).await?;
        Ok(info.participants)
    }

    async fn send_direct(
        &self,
        receiver_id: UserId,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendReceipt> {
        self.post_json(
            "/dm/send",
            &SendDirectBody {
                receiver_id,
                content,
                message_type,
            },
        )
        .await
    }

    async fn send_event(
        &self,
        event_id: EventId,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendReceipt> {
        self.post_json(
            &format!("/chat/event/{}", event_id),
            &SendEventBody {
                content,
                message_type,
            },
        )
        .await
    }
}
