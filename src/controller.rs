//! Message lifecycle controller.
//!
//! Outgoing messages are persisted as `Pending` before the publish starts and
//! move to `Sent` or `Failed` once the transport answers. Incoming payloads
//! are persisted directly as `Received`. Every acknowledgment is tied to the
//! id the store assigned, never to list position.
//!
//! Nothing here propagates an error to the caller: failures are logged and
//! surfaced as [`ChatNotice`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::ChannelSettings;
use crate::error::{ChatError, Result};
use crate::models::{DeliveryStatus, Message, MessageId, NewMessage};
use crate::notify::NotificationSink;
use crate::store::{MessageFeed, MessageStore};
use crate::tasks::TaskRegistry;
use crate::transport::{ChannelTransport, ConnectionState};

const NOTICE_BUFFER: usize = 100;

/// Transient, non-blocking notice for the user (a toast, a status line)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatNotice {
    Warning(String),
    SendFailed { id: MessageId, reason: String },
    Connection(ConnectionState),
}

/// State the controller shares with its background tasks
struct Lifecycle {
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn NotificationSink>,
    notice_tx: mpsc::Sender<ChatNotice>,
    settings: ChannelSettings,
    closed: AtomicBool,
}

impl Lifecycle {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notice(&self, notice: ChatNotice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            debug!("Dropped notice: {}", e);
        }
    }

    /// Persist a new message, reporting failures instead of returning them
    async fn create(&self, message: NewMessage) -> Option<Message> {
        let draft = message.clone();
        match self.store.insert(message).await {
            Ok(id) => Some(draft.persisted(id)),
            Err(e) => {
                self.report("save message", &e);
                None
            }
        }
    }

    async fn transition(&self, message: &Message, next: DeliveryStatus) -> Result<Message> {
        let updated = message.advance(next)?;
        self.store.update(&updated).await?;
        Ok(updated)
    }

    /// Apply the transport's answer for one pending message
    async fn settle(&self, pending: Message, outcome: Result<()>) {
        if self.is_closed() {
            debug!("Acknowledgment for message {} arrived after teardown, ignoring", pending.id);
            return;
        }

        match outcome {
            Ok(()) => {
                debug!("Message {} acknowledged", pending.id);
                if let Err(e) = self.transition(&pending, DeliveryStatus::Sent).await {
                    self.report("mark message as sent", &e);
                    // Don't leave the optimistic entry Pending forever
                    if matches!(e, ChatError::StorageError(_)) {
                        if let Err(e) = self.transition(&pending, DeliveryStatus::Failed).await {
                            error!("Message {} is stuck in Pending: {}", pending.id, e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Publishing message {} failed: {}", pending.id, e);
                self.notice(ChatNotice::SendFailed {
                    id: pending.id,
                    reason: e.to_string(),
                });
                if let Err(e) = self.transition(&pending, DeliveryStatus::Failed).await {
                    self.report("mark message as failed", &e);
                }
            }
        }
    }

    async fn receive(&self, payload: &str) -> Option<MessageId> {
        if self.is_closed() {
            debug!("Inbound payload after teardown, ignoring");
            return None;
        }

        let message = match NewMessage::incoming(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping inbound payload: {}", e);
                return None;
            }
        };

        let received = self.create(message).await?;
        info!("Received message {}", received.id);
        self.notifier.notify(&self.settings.notification_title, &received.text);
        Some(received.id)
    }

    fn connection_changed(&self, state: ConnectionState) {
        info!("Connection state changed to {}", state);
        self.notice(ChatNotice::Connection(state));
        if state.is_degraded() {
            warn!("Connection is {}, outgoing messages may fail", state);
            self.notice(ChatNotice::Warning(format!(
                "Connection {}: messages may not be delivered",
                state
            )));
        }
    }

    fn report(&self, context: &str, err: &ChatError) {
        match err {
            ChatError::NotFoundError(id) => {
                error!(
                    "Could not {}: store has no message {}, id correlation is broken",
                    context, id
                );
            }
            ChatError::ValidationError(reason) => {
                error!("Could not {}: rejected transition: {}", context, reason);
            }
            ChatError::StorageError(_) | ChatError::TransportError(_) => {
                error!("Could not {}: {}", context, err);
            }
        }
        self.notice(ChatNotice::Warning(format!("Could not {}: {}", context, err)));
    }
}

/// Orchestrates messages between the store, the transport and the user
pub struct ChatController {
    lifecycle: Arc<Lifecycle>,
    transport: Arc<dyn ChannelTransport>,
    tasks: TaskRegistry,
}

impl ChatController {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn ChannelTransport>,
        notifier: Arc<dyn NotificationSink>,
        settings: ChannelSettings,
    ) -> (Self, mpsc::Receiver<ChatNotice>) {
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);

        (Self {
            lifecycle: Arc::new(Lifecycle {
                store,
                notifier,
                notice_tx,
                settings,
                closed: AtomicBool::new(false),
            }),
            transport,
            tasks: TaskRegistry::new(),
        }, notice_rx)
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.lifecycle.settings
    }

    /// Subscribe to the inbound channel and start watching the connection
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ChatError::TransportError("controller is shut down".to_string()));
        }

        let settings = &self.lifecycle.settings;
        let mut inbound = self
            .transport
            .subscribe(&settings.subscribe_channel, &settings.event_name)?;
        info!(
            "Listening on {}/{}, publishing on {}",
            settings.subscribe_channel, settings.event_name, settings.publish_channel
        );

        let lifecycle = self.lifecycle.clone();
        self.tasks.spawn_cancellable(async move {
            while let Some(message) = inbound.recv().await {
                debug!("Inbound payload from {:?}", message.client_id);
                lifecycle.receive(&message.data).await;
            }
            debug!("Inbound subscription ended");
        });

        let mut states = self.transport.connection_state();
        let lifecycle = self.lifecycle.clone();
        self.tasks.spawn_cancellable(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                lifecycle.connection_changed(state);
            }
        });

        Ok(())
    }

    /// Live view of every message, oldest first
    pub fn messages(&self) -> MessageFeed {
        self.lifecycle.store.observe_all()
    }

    /// Send `text` to the peer.
    ///
    /// Blank text is ignored. Otherwise the message is stored as `Pending`
    /// before this returns and the publish continues in the background.
    /// Returns the new message id, or `None` if nothing was stored.
    pub async fn submit(&self, text: &str) -> Option<MessageId> {
        if self.is_closed() {
            debug!("Submit after teardown, ignoring");
            return None;
        }

        let draft = match NewMessage::outgoing(text) {
            Ok(draft) => draft,
            Err(e) => {
                debug!("Ignoring submit: {}", e);
                return None;
            }
        };

        let pending = self.lifecycle.create(draft).await?;
        let id = pending.id;
        info!("Message {} pending", id);

        let lifecycle = self.lifecycle.clone();
        let transport = self.transport.clone();
        self.tasks.spawn_cancellable(async move {
            let outcome = transport
                .publish(
                    &lifecycle.settings.publish_channel,
                    &lifecycle.settings.event_name,
                    &pending.text,
                )
                .await;
            lifecycle.settle(pending, outcome).await;
        });

        Some(id)
    }

    /// Store an inbound payload as a `Received` message and notify the user
    pub async fn on_incoming(&self, payload: &str) -> Option<MessageId> {
        self.lifecycle.receive(payload).await
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Cancel background work and release the transport and the store.
    /// Late acknowledgments become no-ops.
    pub async fn shutdown(&self) {
        if self.lifecycle.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down chat controller");

        self.tasks.shutdown();
        self.transport.close().await;
        self.lifecycle.store.close().await;
    }
}
