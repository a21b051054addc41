//! Live view over the message store.
//!
//! Every emission is the complete list of messages ordered by id ascending.
//! Consumers replace whatever they rendered before with the new snapshot;
//! there is no incremental diff.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::models::Message;

pub type Snapshot = Arc<Vec<Message>>;

/// Write half of the live view, owned by a store implementation
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Snapshot>,
}

impl SnapshotPublisher {
    pub fn new(initial: Vec<Message>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Replace the current snapshot and wake every feed
    pub fn publish(&self, messages: Vec<Message>) {
        self.tx.send_replace(Arc::new(messages));
    }

    pub fn current(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> MessageFeed {
        MessageFeed {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read half of the live view. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct MessageFeed {
    rx: watch::Receiver<Snapshot>,
}

impl MessageFeed {
    /// The latest snapshot, marking it as seen
    pub fn current(&mut self) -> Snapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next emission. `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Whether an emission arrived since the last `current` or `changed`
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Stream of snapshots, starting with the current one
    pub fn into_stream(self) -> WatchStream<Snapshot> {
        WatchStream::new(self.rx)
    }
}
