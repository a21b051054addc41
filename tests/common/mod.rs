// Common test utilities for integration tests
// Scripted collaborators for the controller plus helpers to wait on its outputs
#![allow(dead_code)]

// Standard library imports
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

// External crate imports
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, LevelFilter};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout, Duration as TokioDuration};

// Import the crate functionality
use chatterbox_core::{
    store::Snapshot, ChannelNotifier, ChannelSettings, ChannelTransport, ChatController,
    ChatError, ChatNotice, ConnectionState, DeliveryStatus, InboundMessage, Message, MessageFeed,
    MessageId, MessageStore, NewMessage, Notification, SqliteMessageStore,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// How a [`ScriptedTransport`] answers publishes
#[derive(Debug, Clone)]
pub enum AckMode {
    /// Every publish waits until the test calls `ack`
    Manual,
    Succeed,
    Fail(String),
}

type Responder = oneshot::Sender<chatterbox_core::Result<()>>;

/// Transport double whose acknowledgments are driven by the test
pub struct ScriptedTransport {
    mode: Mutex<AckMode>,
    responders: Mutex<Vec<(String, Responder)>>,
    published: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    state: watch::Sender<ConnectionState>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(mode: AckMode) -> Arc<Self> {
        let (state, _rx) = watch::channel(ConnectionState::Connected);
        Arc::new(Self {
            mode: Mutex::new(mode),
            responders: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
            state,
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_mode(&self, mode: AckMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until a publish carrying `data` is waiting for its acknowledgment
    pub async fn wait_for_publish(&self, data: &str) -> Result<()> {
        timeout(TokioDuration::from_secs(5), async {
            loop {
                if self.responders.lock().unwrap().iter().any(|(d, _)| d == data) {
                    return;
                }
                sleep(TokioDuration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out waiting for publish of {:?}", data))
    }

    /// Answer the publish carrying `data`. Returns whether the publisher was
    /// still waiting for the answer.
    pub async fn ack(&self, data: &str, outcome: chatterbox_core::Result<()>) -> Result<bool> {
        self.wait_for_publish(data).await?;
        let responder = {
            let mut responders = self.responders.lock().unwrap();
            let pos = responders
                .iter()
                .position(|(d, _)| d == data)
                .ok_or_else(|| anyhow!("No publish of {:?}", data))?;
            responders.remove(pos).1
        };
        Ok(responder.send(outcome).is_ok())
    }

    /// Push a payload to whoever subscribed
    pub async fn deliver(&self, data: &str) -> Result<()> {
        let tx = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("Nobody subscribed"))?;
        tx.send(InboundMessage {
            channel: "inbox".to_string(),
            event: "default".to_string(),
            data: data.to_string(),
            client_id: Some("peer".to_string()),
        })
        .await
        .map_err(|_| anyhow!("Subscriber is gone"))
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn publish(&self, _channel: &str, _event: &str, data: &str) -> chatterbox_core::Result<()> {
        self.published.lock().unwrap().push(data.to_string());
        let mode = self.mode.lock().unwrap().clone();

        match mode {
            AckMode::Succeed => Ok(()),
            AckMode::Fail(reason) => Err(ChatError::TransportError(reason)),
            AckMode::Manual => {
                let (tx, rx) = oneshot::channel();
                self.responders.lock().unwrap().push((data.to_string(), tx));
                rx.await.unwrap_or_else(|_| {
                    Err(ChatError::TransportError("acknowledgment dropped".to_string()))
                })
            }
        }
    }

    fn subscribe(&self, _channel: &str, _event: &str) -> chatterbox_core::Result<mpsc::Receiver<InboundMessage>> {
        let (tx, rx) = mpsc::channel(100);
        *self.inbound.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
        self.state.send_replace(ConnectionState::Closed);
    }
}

/// SQLite store that can be told to fail specific writes
pub struct FlakyStore {
    inner: SqliteMessageStore,
    fail_inserts: AtomicBool,
    fail_updates_to: Mutex<Vec<DeliveryStatus>>,
    updates: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteMessageStore::open_in_memory().expect("in-memory store"),
            fail_inserts: AtomicBool::new(false),
            fail_updates_to: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
        })
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates_to(&self, status: DeliveryStatus) {
        self.fail_updates_to.lock().unwrap().push(status);
    }

    /// Updates that reached the database
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, message: NewMessage) -> chatterbox_core::Result<MessageId> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(ChatError::StorageError("disk full".to_string()));
        }
        self.inner.insert(message).await
    }

    async fn update(&self, message: &Message) -> chatterbox_core::Result<()> {
        if self.fail_updates_to.lock().unwrap().contains(&message.status) {
            return Err(ChatError::StorageError("disk full".to_string()));
        }
        self.inner.update(message).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: MessageId) -> chatterbox_core::Result<Option<Message>> {
        self.inner.get(id).await
    }

    fn observe_all(&self) -> MessageFeed {
        self.inner.observe_all()
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Everything a test needs to drive one controller
pub struct Harness {
    pub controller: ChatController,
    pub notices: mpsc::Receiver<ChatNotice>,
    pub notifications: mpsc::Receiver<Notification>,
}

pub fn harness(store: Arc<dyn MessageStore>, transport: Arc<dyn ChannelTransport>) -> Harness {
    harness_with(store, transport, ChannelSettings::default())
}

pub fn harness_with(
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn ChannelTransport>,
    settings: ChannelSettings,
) -> Harness {
    setup_logging();
    let (notifier, notifications) = ChannelNotifier::new(100);
    let (controller, notices) = ChatController::new(store, transport, Arc::new(notifier), settings);
    Harness {
        controller,
        notices,
        notifications,
    }
}

/// Wait until the live view shows a snapshot matching the predicate
pub async fn wait_for_snapshot(
    feed: &mut MessageFeed,
    predicate: impl Fn(&[Message]) -> bool,
    timeout_secs: u64,
) -> Result<Snapshot> {
    let current = feed.current();
    if predicate(current.as_slice()) {
        return Ok(current);
    }

    let waited = timeout(TokioDuration::from_secs(timeout_secs), async {
        while let Some(snapshot) = feed.changed().await {
            if predicate(snapshot.as_slice()) {
                return Ok(snapshot);
            }
        }
        Err(anyhow!("Message feed closed"))
    })
    .await;

    match waited {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Timed out waiting for snapshot, last was {:?}", feed.current())),
    }
}

/// Wait for a notice matching the predicate with timeout
pub async fn wait_for_notice(
    notices: &mut mpsc::Receiver<ChatNotice>,
    predicate: impl Fn(&ChatNotice) -> bool,
    timeout_secs: u64,
) -> Result<ChatNotice> {
    info!("Waiting for notice...");
    match timeout(TokioDuration::from_secs(timeout_secs), async {
        while let Some(notice) = notices.recv().await {
            if predicate(&notice) {
                return Ok(notice);
            }
        }
        Err(anyhow!("Notice receiver closed"))
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Timed out waiting for notice")),
    }
}

pub fn status_of(snapshot: &[Message], text: &str) -> Option<DeliveryStatus> {
    snapshot.iter().find(|m| m.text == text).map(|m| m.status)
}

pub fn texts(snapshot: &[Message]) -> Vec<String> {
    snapshot.iter().map(|m| m.text.clone()).collect()
}
