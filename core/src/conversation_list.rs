/// Conversation list aggregation
///
/// Maintains one summary per peer across every conversation the user has
/// touched: last message, timestamp, unread count, read state. Fed by the
/// full-list fetch (which may return one row per message rather than per
/// peer) and by the same live event stream the open thread consumes.
use crate::message::{ConversationKey, Message, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Raw row from the conversation-list endpoint, denormalized per message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "profile_picture")]
    pub avatar: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub sender_id: UserId,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_read: bool,
}

/// Aggregated summary driving one row of the conversation list view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub peer_name: String,
    pub peer_username: Option<String>,
    pub peer_avatar: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub last_sender_id: UserId,
    pub unread_count: u32,
    /// Whether the peer has read our last message; meaningful only when
    /// `last_sender_id` is the session user
    pub is_read: bool,
}

/// Outcome of applying a live message to the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListUpdate {
    /// An existing summary was updated and the list resorted
    Updated,
    /// No summary for this peer; the caller should refetch the full list,
    /// which is the only source of the peer's display fields
    NeedsRefresh,
    /// Nothing to do (e.g. a group message for a chat the list does not track)
    Ignored,
}

pub struct ConversationList {
    current_user: UserId,
    /// Kept sorted descending by `last_message_time`
    summaries: Vec<ConversationSummary>,
}

impl ConversationList {
    pub fn new(current_user: UserId) -> Self {
        Self {
            current_user,
            summaries: Vec::new(),
        }
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn get(&self, key: ConversationKey) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| s.key == key)
    }

    /// Total unread across all conversations, for the list-header badge
    pub fn total_unread(&self) -> u32 {
        self.summaries.iter().map(|s| s.unread_count).sum()
    }

    /// Case-insensitive filter over peer name, username and last message
    pub fn search(&self, query: &str) -> Vec<&ConversationSummary> {
        let query = query.to_lowercase();
        self.summaries
            .iter()
            .filter(|s| {
                s.peer_name.to_lowercase().contains(&query)
                    || s.peer_username
                        .as_deref()
                        .map_or(false, |u| u.to_lowercase().contains(&query))
                    || s.last_message.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Replace the list from a full fetch.
    ///
    /// The backend may report one row per underlying message: rows are
    /// grouped by peer, the row with the maximum `last_message_time`
    /// becomes the representative (later-processed row wins a tie), and
    /// unread counts are summed across all of the peer's rows.
    pub fn load_rows(&mut self, rows: Vec<ConversationRow>) {
        let mut by_peer: HashMap<UserId, ConversationSummary> = HashMap::new();

        for row in rows {
            match by_peer.entry(row.user_id) {
                Entry::Vacant(slot) => {
                    slot.insert(summary_from_row(row));
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.unread_count += row.unread_count;
                    if row.last_message_time >= existing.last_message_time {
                        existing.last_message = row.last_message;
                        existing.last_message_time = row.last_message_time;
                        existing.last_sender_id = row.sender_id;
                        existing.is_read = row.is_read;
                        existing.peer_name = row.name;
                        existing.peer_username = row.username;
                        existing.peer_avatar = row.avatar;
                    }
                }
            }
        }

        self.summaries = by_peer.into_values().collect();
        self.resort();
    }

    /// Apply a live message to the summary set.
    ///
    /// `open` is the conversation currently on screen, if any: inbound
    /// messages for the open conversation do not count as unread.
    pub fn apply_message(&mut self, message: &Message, open: Option<ConversationKey>) -> ListUpdate {
        let key = message.conversation;
        let inbound = message.sender_id != self.current_user;

        match self.summaries.iter_mut().find(|s| s.key == key) {
            Some(summary) => {
                summary.last_message = message.content.clone();
                summary.last_message_time = message.sent_at;
                summary.last_sender_id = message.sender_id;
                if inbound && open != Some(key) {
                    summary.unread_count += 1;
                }
                summary.is_read = !inbound;
                self.resort();
                ListUpdate::Updated
            }
            None => match key {
                // A direct peer the list has never seen: only the backend
                // can supply their display fields, so fall back to a full
                // reconciliation instead of constructing a partial summary.
                ConversationKey::Direct(_) => {
                    debug!("live message for unknown peer {:?}, refresh needed", key);
                    ListUpdate::NeedsRefresh
                }
                ConversationKey::Event(_) => ListUpdate::Ignored,
            },
        }
    }

    /// Handle a read receipt: the peer has viewed the thread
    pub fn mark_read(&mut self, peer_id: UserId) {
        if let Some(summary) = self
            .summaries
            .iter_mut()
            .find(|s| s.key == ConversationKey::Direct(peer_id))
        {
            summary.unread_count = 0;
            summary.is_read = true;
        }
    }

    /// The user opened a conversation; its unread count resets
    pub fn open(&mut self, key: ConversationKey) {
        if let Some(summary) = self.summaries.iter_mut().find(|s| s.key == key) {
            summary.unread_count = 0;
            summary.is_read = true;
        }
    }

    fn resort(&mut self) {
        self.summaries
            .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    }
}

fn summary_from_row(row: ConversationRow) -> ConversationSummary {
    ConversationSummary {
        key: ConversationKey::Direct(row.user_id),
        peer_name: row.name,
        peer_username: row.username,
        peer_avatar: row.avatar,
        last_message: row.last_message,
        last_message_time: row.last_message_time,
        last_sender_id: row.sender_id,
        unread_count: row.unread_count,
        is_read: row.is_read,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, MessageType};
    use chrono::TimeZone;

    const ME: UserId = 1;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 10, minute, 0).unwrap()
    }

    fn row(peer: UserId, minute: u32, unread: u32) -> ConversationRow {
        ConversationRow {
            user_id: peer,
            name: format!("peer-{}", peer),
            username: None,
            avatar: None,
            last_message: format!("at {}", minute),
            last_message_time: at(minute),
            sender_id: peer,
            unread_count: unread,
            is_read: false,
        }
    }

    fn inbound(peer: UserId, minute: u32) -> Message {
        Message {
            id: MessageId::Server(1000 + minute as u64),
            conversation: ConversationKey::Direct(peer),
            sender_id: peer,
            content: format!("from {} at {}", peer, minute),
            message_type: MessageType::Text,
            sent_at: at(minute),
            sender_name: format!("peer-{}", peer),
            sender_avatar: None,
        }
    }

    fn outbound(peer: UserId, minute: u32) -> Message {
        Message {
            sender_id: ME,
            sender_name: "me".to_string(),
            ..inbound(peer, minute)
        }
    }

    #[test]
    fn merge_keeps_latest_row_and_sums_unread() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 1), row(7, 5, 2), row(7, 2, 3)]);

        assert_eq!(list.summaries().len(), 1);
        let summary = &list.summaries()[0];
        assert_eq!(summary.last_message_time, at(5));
        assert_eq!(summary.last_message, "at 5");
        assert_eq!(summary.unread_count, 6);
    }

    #[test]
    fn list_stays_sorted_most_recent_first() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 0), row(8, 9, 0), row(9, 5, 0)]);

        let peers: Vec<_> = list.summaries().iter().map(|s| s.key).collect();
        assert_eq!(
            peers,
            vec![
                ConversationKey::Direct(8),
                ConversationKey::Direct(9),
                ConversationKey::Direct(7)
            ]
        );

        // a live message moves its conversation to the front
        list.apply_message(&inbound(7, 15), None);
        assert_eq!(list.summaries()[0].key, ConversationKey::Direct(7));
    }

    #[test]
    fn unread_accumulates_and_resets_on_open() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 2)]);

        list.apply_message(&inbound(7, 1), None);
        list.apply_message(&inbound(7, 2), None);
        assert_eq!(list.get(ConversationKey::Direct(7)).unwrap().unread_count, 4);

        list.open(ConversationKey::Direct(7));
        assert_eq!(list.get(ConversationKey::Direct(7)).unwrap().unread_count, 0);
    }

    #[test]
    fn open_conversation_does_not_count_unread() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 0)]);

        list.apply_message(&inbound(7, 1), Some(ConversationKey::Direct(7)));
        assert_eq!(list.get(ConversationKey::Direct(7)).unwrap().unread_count, 0);
    }

    #[test]
    fn outbound_message_updates_preview_without_unread() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 0)]);

        let update = list.apply_message(&outbound(7, 3), None);
        assert_eq!(update, ListUpdate::Updated);

        let summary = list.get(ConversationKey::Direct(7)).unwrap();
        assert_eq!(summary.unread_count, 0);
        assert_eq!(summary.last_sender_id, ME);
    }

    #[test]
    fn unknown_peer_requests_refresh() {
        let mut list = ConversationList::new(ME);
        assert_eq!(list.apply_message(&inbound(7, 0), None), ListUpdate::NeedsRefresh);
        assert!(list.summaries().is_empty());
    }

    #[test]
    fn read_receipt_clears_unread_and_marks_read() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 3)]);

        list.mark_read(7);
        let summary = list.get(ConversationKey::Direct(7)).unwrap();
        assert_eq!(summary.unread_count, 0);
        assert!(summary.is_read);
    }

    #[test]
    fn total_unread_and_search() {
        let mut list = ConversationList::new(ME);
        list.load_rows(vec![row(7, 0, 2), row(8, 1, 3)]);

        assert_eq!(list.total_unread(), 5);
        assert_eq!(list.search("peer-8").len(), 1);
        assert_eq!(list.search("AT ").len(), 2);
        assert!(list.search("nobody").is_empty());
    }
}
