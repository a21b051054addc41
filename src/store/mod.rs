// Message store contract and its backends

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Message, MessageId, NewMessage};

pub mod feed;
pub mod sqlite;

pub use feed::{MessageFeed, Snapshot, SnapshotPublisher};
pub use sqlite::SqliteMessageStore;

/// Durable, create-then-update record of every message.
///
/// The lifecycle controller is the only writer. Rows are never deleted.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return the id assigned to it.
    ///
    /// The live view emits a fresh snapshot once the row is written.
    async fn insert(&self, message: NewMessage) -> Result<MessageId>;

    /// Replace the stored status of an existing message.
    ///
    /// Fails with `NotFoundError` for an unknown id and `ValidationError` for
    /// an illegal transition or a changed direction. Writing the values that
    /// are already stored is a no-op and does not emit.
    async fn update(&self, message: &Message) -> Result<()>;

    /// Point read of a single message
    async fn get(&self, id: MessageId) -> Result<Option<Message>>;

    /// Live, full-snapshot view of every message in insertion order
    fn observe_all(&self) -> MessageFeed;

    /// Release the underlying handle. Later mutations fail with `StorageError`.
    async fn close(&self);
}
