// Re-export needed modules for testing
pub mod config;
pub mod controller;  // Message lifecycle state machine
pub mod error;
pub mod models;
pub mod notify;
pub mod store;  // Message history and its live view
pub mod tasks;
pub mod transport;  // Realtime pub/sub contract and the in-process hub

// Re-export main types for convenience
pub use config::{ChannelSettings, ChatConfig};
pub use controller::{ChatController, ChatNotice};
pub use error::{ChatError, Result};
pub use models::*;
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationSink};
pub use store::{MessageFeed, MessageStore, SqliteMessageStore};
pub use transport::{ChannelTransport, ConnectionState, HubConnection, InboundMessage, LocalHub};
