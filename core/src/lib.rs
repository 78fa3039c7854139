/// Trafellow Chat Core - client-side real-time conversation state
///
/// Merges REST-fetched message history with live socket events, deduplicates
/// messages, maintains unread counters, and keeps the conversation list
/// ordered most-recent-first. The presentation shell embedding this crate
/// renders the state and issues user intents (open, send, mark read).

pub mod api;
pub mod config;
pub mod conversation_list;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod message_store;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{ChatError, Result};
pub use message::{ConversationKey, Message, MessageId, MessageType, UserProfile};
pub use session::{ChatSession, SessionEffect};
pub use transport::ConnectionStatus;
