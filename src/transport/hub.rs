//! In-process realtime hub.
//!
//! Named channels fan out every published payload to all subscribers of the
//! matching event. Each [`HubConnection`] carries its own connection state;
//! only `Connected` connections may publish or receive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use super::{ChannelTransport, ConnectionState, InboundMessage};

const SUBSCRIBER_BUFFER: usize = 100;

struct Subscriber {
    connection_id: Uuid,
    event: String,
    tx: mpsc::Sender<InboundMessage>,
    state: watch::Receiver<ConnectionState>,
}

/// Channel registry shared by every connection made from it
#[derive(Clone, Default)]
pub struct LocalHub {
    channels: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection. It starts out `Connected`.
    pub fn connect(&self, client_id: &str) -> HubConnection {
        let id = Uuid::new_v4();
        let (state, _rx) = watch::channel(ConnectionState::Connecting);
        info!("Hub connection {} opened for client {}", id, client_id);
        state.send_replace(ConnectionState::Connected);

        HubConnection {
            id,
            client_id: client_id.to_string(),
            hub: self.clone(),
            state,
        }
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        match self.channels.lock() {
            Ok(channels) => channels
                .get(channel)
                .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn register(&self, channel: &str, subscriber: Subscriber) -> Result<()> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| ChatError::TransportError("hub registry poisoned".to_string()))?;
        channels.entry(channel.to_string()).or_default().push(subscriber);
        Ok(())
    }

    fn unregister(&self, connection_id: Uuid) {
        if let Ok(mut channels) = self.channels.lock() {
            for subs in channels.values_mut() {
                subs.retain(|s| s.connection_id != connection_id);
            }
            channels.retain(|_, subs| !subs.is_empty());
        }
    }

    /// Fan `message` out to every reachable subscriber. Returns how many got it.
    /// A subscriber whose buffer is full misses the message rather than
    /// stalling the publisher.
    fn deliver(&self, message: InboundMessage) -> Result<usize> {
        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let mut channels = self
                .channels
                .lock()
                .map_err(|_| ChatError::TransportError("hub registry poisoned".to_string()))?;
            match channels.get_mut(&message.channel) {
                Some(subs) => {
                    subs.retain(|s| !s.tx.is_closed());
                    subs.iter()
                        .filter(|s| s.event == message.event && s.state.borrow().is_usable())
                        .map(|s| s.tx.clone())
                        .collect()
                }
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for tx in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber on {} is not keeping up, dropping message", message.channel);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(delivered)
    }
}

/// One client's connection to a [`LocalHub`]
pub struct HubConnection {
    id: Uuid,
    client_id: String,
    hub: LocalHub,
    state: watch::Sender<ConnectionState>,
}

impl HubConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Drive the connection state, as a realtime SDK's connection manager
    /// would on network changes. A closed connection stays closed.
    pub fn set_state(&self, next: ConnectionState) {
        let current = self.state();
        if current == ConnectionState::Closed {
            debug!("Ignoring {} for closed hub connection {}", next, self.id);
            return;
        }
        if current != next {
            info!("Hub connection {} is now {} (was {})", self.id, next, current);
            self.state.send_replace(next);
        }
    }
}

#[async_trait]
impl ChannelTransport for HubConnection {
    async fn publish(&self, channel: &str, event: &str, data: &str) -> Result<()> {
        let state = self.state();
        if !state.is_usable() {
            warn!("Cannot publish on {} while connection is {}", channel, state);
            return Err(ChatError::TransportError(format!(
                "cannot publish on '{}' while connection is {}",
                channel, state
            )));
        }

        let delivered = self
            .hub
            .deliver(InboundMessage {
                channel: channel.to_string(),
                event: event.to_string(),
                data: data.to_string(),
                client_id: Some(self.client_id.clone()),
            })?;
        debug!("Published on {} to {} subscriber(s)", channel, delivered);
        Ok(())
    }

    fn subscribe(&self, channel: &str, event: &str) -> Result<mpsc::Receiver<InboundMessage>> {
        if self.state() == ConnectionState::Closed {
            return Err(ChatError::TransportError(format!(
                "cannot subscribe to '{}' on a closed connection",
                channel
            )));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.hub.register(
            channel,
            Subscriber {
                connection_id: self.id,
                event: event.to_string(),
                tx,
                state: self.state.subscribe(),
            },
        )?;
        debug!("Connection {} subscribed to {}/{}", self.id, channel, event);
        Ok(rx)
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn close(&self) {
        self.set_state(ConnectionState::Closed);
        self.hub.unregister(self.id);
        info!("Hub connection {} closed", self.id);
    }
}
