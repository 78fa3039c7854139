/// Chat session - the reconciliation core
///
/// Owns the conversation list, the (at most one) open message store, the
/// REST client and the shared live transport. Live events, history pages
/// and user sends all funnel through here; every mutation broadcasts a
/// `SessionEffect` the presentation layer re-renders on.
use crate::api::{ChatApi, RestApi};
use crate::config::Config;
use crate::conversation_list::{ConversationList, ConversationSummary, ListUpdate};
use crate::error::{ChatError, Result};
use crate::events::{ClientFrame, LiveEvent};
use crate::message::{
    ConversationKey, EventId, Message, MessageId, MessageType, Participant, UserId, UserProfile,
};
use crate::message_store::{Merge, MessageStore};
use crate::transport::{ConnectionStatus, LiveTransport, WsTransport};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

const EFFECT_CHANNEL_CAPACITY: usize = 256;

/// Notifications to the presentation layer. Purely descriptive: rendering
/// (scrolling, toasts, badges) stays on the other side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// The open conversation's message sequence changed
    MessagesChanged {
        scroll_to_latest: bool,
        date_separator: bool,
    },
    /// The conversation list changed (order, previews, unread counts)
    ConversationsChanged,
    /// The open group chat's participant list was refreshed
    ParticipantsChanged { event_id: EventId },
    /// Someone joined or left the open group chat
    MembershipChanged {
        event_id: EventId,
        user_name: String,
        joined: bool,
    },
    /// A direct message arrived for a conversation that is not open
    DirectMessageNotification {
        sender_id: UserId,
        sender_name: String,
    },
    /// Shared socket status changed
    ConnectionChanged(ConnectionStatus),
}

struct SessionState {
    open: Option<MessageStore>,
    participants: Vec<Participant>,
    conversations: ConversationList,
    /// Bumped on every open/close; a history response carrying a stale
    /// epoch is discarded instead of populating the wrong view
    epoch: u64,
}

pub struct ChatSession {
    config: Config,
    profile: UserProfile,
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn LiveTransport>,
    state: Arc<RwLock<SessionState>>,
    effects_tx: broadcast::Sender<SessionEffect>,
}

impl ChatSession {
    pub fn new(
        config: Config,
        profile: UserProfile,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let (effects_tx, _) = broadcast::channel(EFFECT_CHANNEL_CAPACITY);
        let state = SessionState {
            open: None,
            participants: Vec::new(),
            conversations: ConversationList::new(profile.user_id),
            epoch: 0,
        };

        Self {
            config,
            profile,
            api,
            transport,
            state: Arc::new(RwLock::new(state)),
            effects_tx,
        }
    }

    /// Session wired to the real REST backend and socket server
    pub fn with_defaults(config: Config, profile: UserProfile) -> Self {
        let api = Arc::new(RestApi::new(config.api_base_url.as_str(), profile.user_id));
        let transport = Arc::new(WsTransport::new(&config, profile.user_id));
        Self::new(config, profile, api, transport)
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Subscribe to mutation notifications
    pub fn effects(&self) -> broadcast::Receiver<SessionEffect> {
        self.effects_tx.subscribe()
    }

    /// Shared socket status, for the connected/disconnected indicator
    pub fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.status()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Bring the live transport up and start pumping its events
    pub async fn connect(&self) -> Result<()> {
        info!("starting chat session for user {}", self.profile.user_id);
        self.transport.connect().await?;

        let session = self.clone();
        let mut events = self.transport.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => session.handle_live_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event pump lagged {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut status = self.transport.status();
        let effects_tx = self.effects_tx.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow();
                let _ = effects_tx.send(SessionEffect::ConnectionChanged(current));
            }
        });

        Ok(())
    }

    /// Tear the session down on logout
    pub async fn shutdown(&self) {
        if let Err(e) = self.close_conversation().await {
            warn!("leaving open conversation on shutdown: {}", e);
        }
        self.transport.shutdown().await;
    }

    // ─── Conversation lifecycle ──────────────────────────────────────────────

    /// Open a conversation: subscribe to its room, fetch history into a
    /// fresh store, and zero its unread count.
    ///
    /// Live events arriving while the fetch is in flight land in the
    /// store first and the history merge deduplicates the overlap. If the
    /// user has moved on by the time the fetch resolves, the response is
    /// discarded.
    pub async fn open_conversation(&self, key: ConversationKey) -> Result<()> {
        let (prior, epoch) = {
            let mut state = self.state.write().await;
            let prior = state.open.take().map(|s| s.conversation());
            state.open = Some(MessageStore::new(key));
            state.participants.clear();
            state.conversations.open(key);
            state.epoch += 1;
            (prior, state.epoch)
        };
        self.emit(SessionEffect::ConversationsChanged);

        if let Some(prior) = prior {
            self.transport.leave(prior).await?;
        }
        self.transport.join(key).await?;

        let history = self
            .api
            .fetch_history(key, self.config.history_limit)
            .await?;

        {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                debug!("discarding stale history response for {:?}", key);
                return Ok(());
            }
            if let Some(store) = state.open.as_mut() {
                store.load_history(history);
            }
        }
        self.emit(SessionEffect::MessagesChanged {
            scroll_to_latest: true,
            date_separator: false,
        });

        if let ConversationKey::Event(event_id) = key {
            self.refresh_participants(event_id, epoch).await?;
        }
        Ok(())
    }

    /// Leave the open conversation, tearing down its room subscription.
    /// The store is dropped; nothing outlives the view.
    pub async fn close_conversation(&self) -> Result<()> {
        let key = {
            let mut state = self.state.write().await;
            state.epoch += 1;
            state.participants.clear();
            state.open.take().map(|s| s.conversation())
        };
        if let Some(key) = key {
            debug!("closed conversation {:?}", key);
            self.transport.leave(key).await?;
        }
        Ok(())
    }

    pub async fn open_key(&self) -> Option<ConversationKey> {
        self.state.read().await.open.as_ref().map(|s| s.conversation())
    }

    // ─── Send path ───────────────────────────────────────────────────────────

    /// Send a message into the open conversation.
    ///
    /// An optimistic record with a placeholder id is appended first, then
    /// the persist call runs; on success the placeholder is rewritten to
    /// the confirmed server id (or collapsed into the live echo if that
    /// arrived first) and the echo frame goes out to other participants.
    /// On failure the optimistic record is removed and the error is
    /// surfaced; the typed text is the caller's to keep for retry.
    pub async fn send_message(&self, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Send("message is empty".to_string()));
        }
        let key = self
            .open_key()
            .await
            .ok_or_else(|| ChatError::Send("no open conversation".to_string()))?;

        let optimistic = Message {
            id: MessageId::local(),
            conversation: key,
            sender_id: self.profile.user_id,
            content: content.to_string(),
            message_type: MessageType::Text,
            sent_at: Utc::now(),
            sender_name: self.profile.name.clone(),
            sender_avatar: self.profile.avatar.clone(),
        };
        let local_id = optimistic.id;

        let merge = {
            let mut state = self.state.write().await;
            match state.open.as_mut() {
                Some(store) => store.reconcile(optimistic.clone()),
                None => return Err(ChatError::Send("no open conversation".to_string())),
            }
        };
        if let Merge::Appended { date_separator } = merge {
            self.emit(SessionEffect::MessagesChanged {
                scroll_to_latest: true,
                date_separator,
            });
        }

        let sent = match key {
            ConversationKey::Direct(peer_id) => {
                self.api
                    .send_direct(peer_id, content, MessageType::Text)
                    .await
            }
            ConversationKey::Event(event_id) => {
                self.api
                    .send_event(event_id, content, MessageType::Text)
                    .await
            }
        };

        let receipt = match sent {
            Ok(receipt) => receipt,
            Err(e) => {
                let mut state = self.state.write().await;
                if let Some(store) = state.open.as_mut() {
                    store.remove(&local_id);
                }
                drop(state);
                self.emit(SessionEffect::MessagesChanged {
                    scroll_to_latest: false,
                    date_separator: false,
                });
                return Err(e);
            }
        };

        let confirmed = Message {
            id: MessageId::Server(receipt.message_id),
            ..optimistic
        };

        let list_update = {
            let mut state = self.state.write().await;
            if let Some(store) = state.open.as_mut() {
                if !store.confirm(&local_id, receipt.message_id) {
                    debug!("optimistic record gone before confirmation");
                }
            }
            state.conversations.apply_message(&confirmed, Some(key))
        };
        self.emit(SessionEffect::ConversationsChanged);
        if list_update == ListUpdate::NeedsRefresh {
            if let Err(e) = self.refresh_conversations().await {
                warn!("conversation list refresh after send failed: {}", e);
            }
        }

        let echo = match key {
            ConversationKey::Direct(peer_id) => ClientFrame::SendDm {
                sender_id: self.profile.user_id,
                receiver_id: peer_id,
                content: confirmed.content.clone(),
                message_id: receipt.message_id,
            },
            ConversationKey::Event(event_id) => ClientFrame::SendEventMessage {
                event_id,
                sender_id: self.profile.user_id,
                content: confirmed.content.clone(),
                message_id: receipt.message_id,
            },
        };
        if let Err(e) = self.transport.send(echo).await {
            // the message is persisted; the echo is best-effort
            warn!("echo frame not sent: {}", e);
        }

        Ok(confirmed)
    }

    // ─── Conversation list ───────────────────────────────────────────────────

    /// Full fetch and merge of the conversation list
    pub async fn refresh_conversations(&self) -> Result<()> {
        let rows = self.api.fetch_conversations().await?;
        {
            let mut state = self.state.write().await;
            state.conversations.load_rows(rows);
        }
        self.emit(SessionEffect::ConversationsChanged);
        Ok(())
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.state.read().await.conversations.summaries().to_vec()
    }

    pub async fn total_unread(&self) -> u32 {
        self.state.read().await.conversations.total_unread()
    }

    pub async fn search_conversations(&self, query: &str) -> Vec<ConversationSummary> {
        self.state
            .read()
            .await
            .conversations
            .search(query)
            .into_iter()
            .cloned()
            .collect()
    }

    // ─── Open conversation views ─────────────────────────────────────────────

    pub async fn messages(&self) -> Vec<Message> {
        match &self.state.read().await.open {
            Some(store) => store.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.state.read().await.participants.clone()
    }

    // ─── Reconciliation ──────────────────────────────────────────────────────

    /// Route one live event: into the open store when the conversation
    /// matches, and into the conversation list either way.
    pub async fn handle_live_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::NewDirectMessage { message } => {
                let message = message.into_message(self.profile.user_id);
                self.apply_incoming(message).await;
            }
            LiveEvent::NewEventMessage { message } => {
                self.apply_incoming(message.into_message()).await;
            }
            LiveEvent::MessagesRead { reader_id } => {
                let mut state = self.state.write().await;
                state.conversations.mark_read(reader_id);
                drop(state);
                self.emit(SessionEffect::ConversationsChanged);
            }
            LiveEvent::ParticipantJoined {
                event_id,
                user_name,
                ..
            } => {
                self.membership_changed(event_id, user_name, true).await;
            }
            LiveEvent::ParticipantLeft {
                event_id,
                user_name,
                ..
            } => {
                self.membership_changed(event_id, user_name, false).await;
            }
            LiveEvent::DirectMessageNotification {
                sender_id,
                sender_name,
            } => {
                let open = self.open_key().await;
                if open != Some(ConversationKey::Direct(sender_id)) {
                    self.emit(SessionEffect::DirectMessageNotification {
                        sender_id,
                        sender_name,
                    });
                }
            }
        }
    }

    /// Merge one message into the open store (if it belongs there) and
    /// the conversation list (always)
    async fn apply_incoming(&self, message: Message) {
        let (merge, list_update) = {
            let mut state = self.state.write().await;
            let open_key = state.open.as_ref().map(|s| s.conversation());
            let merge = match state.open.as_mut() {
                Some(store) if store.conversation() == message.conversation => {
                    Some(store.reconcile(message.clone()))
                }
                _ => None,
            };
            let list_update = state.conversations.apply_message(&message, open_key);
            (merge, list_update)
        };

        match merge {
            Some(Merge::Appended { date_separator }) => {
                self.emit(SessionEffect::MessagesChanged {
                    scroll_to_latest: true,
                    date_separator,
                });
            }
            Some(Merge::Inserted) => {
                self.emit(SessionEffect::MessagesChanged {
                    scroll_to_latest: false,
                    date_separator: false,
                });
            }
            Some(Merge::Duplicate) => debug!("duplicate live message absorbed"),
            Some(Merge::OtherConversation) | None => {}
        }

        match list_update {
            ListUpdate::Updated => self.emit(SessionEffect::ConversationsChanged),
            ListUpdate::NeedsRefresh => {
                if let Err(e) = self.refresh_conversations().await {
                    warn!("conversation list refresh failed: {}", e);
                }
            }
            ListUpdate::Ignored => {}
        }
    }

    async fn membership_changed(&self, event_id: EventId, user_name: String, joined: bool) {
        let (relevant, epoch) = {
            let state = self.state.read().await;
            let relevant = state.open.as_ref().map(|s| s.conversation())
                == Some(ConversationKey::Event(event_id));
            (relevant, state.epoch)
        };
        if !relevant {
            return;
        }

        self.emit(SessionEffect::MembershipChanged {
            event_id,
            user_name,
            joined,
        });
        if let Err(e) = self.refresh_participants(event_id, epoch).await {
            warn!("participant refresh for event {} failed: {}", event_id, e);
        }
    }

    /// Refetch the participant list of the open group chat. Discarded if
    /// the view moved on while the fetch was in flight.
    async fn refresh_participants(&self, event_id: EventId, epoch: u64) -> Result<()> {
        let participants = self.api.fetch_participants(event_id).await?;
        {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                debug!("discarding stale participant list for event {}", event_id);
                return Ok(());
            }
            state.participants = participants;
        }
        self.emit(SessionEffect::ParticipantsChanged { event_id });
        Ok(())
    }

    fn emit(&self, effect: SessionEffect) {
        // no receivers is fine; effects are fire-and-forget
        let _ = self.effects_tx.send(effect);
    }
}

impl Clone for ChatSession {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            profile: self.profile.clone(),
            api: self.api.clone(),
            transport: self.transport.clone(),
            state: self.state.clone(),
            effects_tx: self.effects_tx.clone(),
        }
    }
}
