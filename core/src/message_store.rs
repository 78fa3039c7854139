/// In-memory message sequence for one open conversation
///
/// Records are unique by id and kept ordered by `sent_at`. History rows and
/// live events funnel through the same merge so overlap between the two
/// sources is absorbed, whichever arrives first. State lives only for the
/// session; nothing is persisted across reloads.
use crate::message::{needs_date_separator, ConversationKey, Message, MessageId};
use tracing::{debug, warn};

/// Result of merging one incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// New record, newer than everything already held (the common case)
    Appended { date_separator: bool },
    /// New record that arrived out of order and was inserted mid-sequence
    Inserted,
    /// Already present by id; incoming copy discarded
    Duplicate,
    /// Belongs to a different conversation; not merged
    OtherConversation,
}

pub struct MessageStore {
    conversation: ConversationKey,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(conversation: ConversationKey) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
        }
    }

    pub fn conversation(&self) -> ConversationKey {
        self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| m.id == *id)
    }

    /// Merge a fetched history page. Rows go through the same reconcile
    /// path as live events, so anything that was pushed while the fetch
    /// was in flight stays deduplicated.
    pub fn load_history(&mut self, rows: Vec<Message>) {
        for row in rows {
            self.reconcile(row);
        }
    }

    /// Merge one incoming message.
    ///
    /// Duplicates by id are discarded. New records append when they are in
    /// order and otherwise insert by binary search on `sent_at`, so a late
    /// delivery after a reconnection gap cannot leave the sequence
    /// unsorted. Equal timestamps keep arrival order.
    pub fn reconcile(&mut self, message: Message) -> Merge {
        if message.conversation != self.conversation {
            warn!(
                "dropping message for {:?} from store {:?}",
                message.conversation, self.conversation
            );
            return Merge::OtherConversation;
        }

        if self.contains(&message.id) {
            debug!("duplicate message {:?} discarded", message.id);
            return Merge::Duplicate;
        }

        let in_order = self
            .messages
            .last()
            .map_or(true, |last| last.sent_at <= message.sent_at);

        if in_order {
            let date_separator = needs_date_separator(self.messages.last(), &message);
            self.messages.push(message);
            Merge::Appended { date_separator }
        } else {
            let at = self
                .messages
                .partition_point(|m| m.sent_at <= message.sent_at);
            debug!(
                "out-of-order message {:?} inserted at {} of {}",
                message.id,
                at,
                self.messages.len()
            );
            self.messages.insert(at, message);
            Merge::Inserted
        }
    }

    /// Rewrite an optimistic record's placeholder id to the confirmed
    /// server id. If the live echo already landed under the server id,
    /// the placeholder is removed instead, leaving a single record.
    pub fn confirm(&mut self, local: &MessageId, server_id: u64) -> bool {
        let confirmed = MessageId::Server(server_id);
        if self.contains(&confirmed) {
            self.remove(local);
            return true;
        }
        match self.messages.iter_mut().find(|m| m.id == *local) {
            Some(message) => {
                message.id = confirmed;
                true
            }
            None => false,
        }
    }

    /// Drop a record, e.g. an optimistic entry whose send failed
    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != *id);
        self.messages.len() != before
    }
}
