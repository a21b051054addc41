// Realtime pub/sub transport contract
// The core only publishes, subscribes and watches connection state; reconnecting
// is left to the transport implementation.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

pub mod hub;

pub use hub::{HubConnection, LocalHub};

/// Event name messages are published and subscribed under
pub const DEFAULT_EVENT: &str = "default";

/// Connection lifecycle as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected, // Temporarily lost, transport is retrying
    Suspended,    // Lost for long enough that the transport backs off
    Failed,       // Gave up, will not recover on its own
    Closed,
}

impl ConnectionState {
    /// Whether publishing can succeed in this state
    pub fn is_usable(self) -> bool {
        self == ConnectionState::Connected
    }

    /// States worth warning the user about
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Suspended | ConnectionState::Failed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A payload delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub event: String,
    pub data: String,
    /// Client id of the publisher, when the transport knows it
    pub client_id: Option<String>,
}

/// Single shared connection to a realtime pub/sub service
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Publish `data` under `event` on `channel`.
    ///
    /// Resolves once the service acknowledged or rejected the message.
    async fn publish(&self, channel: &str, event: &str, data: &str) -> Result<()>;

    /// Receive every payload published under `event` on `channel`
    fn subscribe(&self, channel: &str, event: &str) -> Result<mpsc::Receiver<InboundMessage>>;

    /// Current connection state plus every later change
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Drop every subscription and release the connection
    async fn close(&self);
}
