use thiserror::Error;

use crate::models::MessageId;

/// Errors raised by the message store, the transport and the lifecycle controller
#[derive(Debug, Error)]
pub enum ChatError {
    /// Blank text or an illegal direction/status combination
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The persistence backend failed to read or write
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Publish rejected or the connection is unusable
    #[error("Transport error: {0}")]
    TransportError(String),

    /// An update referenced an id the store never assigned
    #[error("Message {0} not found")]
    NotFoundError(MessageId),
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::StorageError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::StorageError(format!("storage task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
