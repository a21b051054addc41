use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Store-assigned message identifier. Strictly increasing, never reused.
pub type MessageId = i64;

/// Which side of the conversation a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent = 0,     // Typed by the local user
    Received = 1, // Delivered by the channel
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending = 0,  // Persisted locally, publish not acknowledged yet
    Sent = 1,     // Publish acknowledged by the channel
    Failed = 2,   // Publish rejected or connection lost
    Received = 3, // Inbound message, terminal from creation
}

impl Direction {
    /// Status a freshly created message of this direction starts in
    pub fn initial_status(self) -> DeliveryStatus {
        match self {
            Direction::Sent => DeliveryStatus::Pending,
            Direction::Received => DeliveryStatus::Received,
        }
    }

    /// Whether `status` is a legal status for a message of this direction
    pub fn admits(self, status: DeliveryStatus) -> bool {
        match self {
            Direction::Sent => matches!(
                status,
                DeliveryStatus::Pending | DeliveryStatus::Sent | DeliveryStatus::Failed
            ),
            Direction::Received => status == DeliveryStatus::Received,
        }
    }

    pub(crate) fn to_sql(self) -> i64 {
        self as i64
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(Direction::Sent),
            1 => Some(Direction::Received),
            _ => None,
        }
    }
}

impl DeliveryStatus {
    /// Only `Pending` moves forward. Re-applying the current status is allowed
    /// so repeated acknowledgments stay harmless.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (DeliveryStatus::Pending, DeliveryStatus::Sent)
                | (DeliveryStatus::Pending, DeliveryStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self != DeliveryStatus::Pending
    }

    pub(crate) fn to_sql(self) -> i64 {
        self as i64
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(DeliveryStatus::Pending),
            1 => Some(DeliveryStatus::Sent),
            2 => Some(DeliveryStatus::Failed),
            3 => Some(DeliveryStatus::Received),
            _ => None,
        }
    }
}

/// A message that has not been written to the store yet.
///
/// Only [`NewMessage::outgoing`] and [`NewMessage::incoming`] build one, which
/// keeps every outgoing message starting life as `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    text: String,
    direction: Direction,
    status: DeliveryStatus,
    timestamp: u64,
}

impl NewMessage {
    /// A message typed by the local user, starting in `Pending`
    pub fn outgoing(text: &str) -> Result<Self> {
        Self::create(text, Direction::Sent)
    }

    /// A message delivered by the channel, created directly as `Received`
    pub fn incoming(text: &str) -> Result<Self> {
        Self::create(text, Direction::Received)
    }

    fn create(text: &str, direction: Direction) -> Result<Self> {
        let message = Self {
            text: text.to_string(),
            direction,
            status: direction.initial_status(),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
        };
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<()> {
        validate_text(&self.text)?;
        if !self.direction.admits(self.status) {
            return Err(ChatError::ValidationError(format!(
                "{:?} is not a valid status for a {:?} message",
                self.status, self.direction
            )));
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Attach the id the store assigned on insert
    pub fn persisted(self, id: MessageId) -> Message {
        Message {
            id,
            text: self.text,
            direction: self.direction,
            status: self.status,
            timestamp: self.timestamp,
        }
    }
}

/// A persisted message as surfaced by the live view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub direction: Direction,
    pub status: DeliveryStatus,
    pub timestamp: u64,
}

impl Message {
    /// Copy of this message moved to `next`, if the transition is legal
    pub fn advance(&self, next: DeliveryStatus) -> Result<Message> {
        if !self.direction.admits(next) || !self.status.can_transition_to(next) {
            return Err(ChatError::ValidationError(format!(
                "message {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        Ok(Message {
            status: next,
            ..self.clone()
        })
    }
}

pub(crate) fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ChatError::ValidationError(
            "message text must not be blank".to_string(),
        ));
    }
    Ok(())
}
