// src/store/sqlite.rs
//! SQLite-backed message history
//!
//! Every write runs on the blocking pool and publishes the new snapshot while
//! the connection lock is still held, so emissions always match what is on
//! disk and arrive in the same order as the writes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{ChatError, Result};
use crate::models::{Direction, DeliveryStatus, Message, MessageId, NewMessage};
use super::{MessageFeed, MessageStore, SnapshotPublisher};

const SELECT_COLUMNS: &str = "SELECT id, text, direction, status, timestamp FROM messages";

/// Message store persisted in a single SQLite table
pub struct SqliteMessageStore {
    /// `None` once the store has been closed
    conn: Arc<Mutex<Option<Connection>>>,

    /// Live view of the table
    snapshots: Arc<SnapshotPublisher>,
}

impl SqliteMessageStore {
    /// Open (or create) the database at `path`, loading existing history
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ChatError::StorageError(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened message database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open a throwaway database that lives as long as the store
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open the database in the user's data directory
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path().map_err(|e| ChatError::StorageError(e.to_string()))?;
        Self::open(path)
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::data_dir().ok_or_else(|| anyhow!("Could not determine data directory"))?;
        path.push("chatterbox");
        path.push("messages.db");
        Ok(path)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::create_tables(&conn)?;
        Self::fail_interrupted_sends(&conn)?;
        let history = Self::load_all(&conn)?;
        debug!("Loaded {} stored messages", history.len());

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            snapshots: Arc::new(SnapshotPublisher::new(history)),
        })
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        // AUTOINCREMENT keeps ids monotonic even if the last row were ever removed
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                direction INTEGER NOT NULL,
                status INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Outgoing rows still `Pending` belong to a publish that died with the
    /// previous session. Nothing will ever acknowledge them, so they fail.
    fn fail_interrupted_sends(conn: &Connection) -> Result<usize> {
        let failed = conn.execute(
            "UPDATE messages SET status = ?1 WHERE direction = ?2 AND status = ?3",
            params![
                DeliveryStatus::Failed.to_sql(),
                Direction::Sent.to_sql(),
                DeliveryStatus::Pending.to_sql(),
            ],
        )?;
        if failed > 0 {
            warn!("Marked {} interrupted outgoing message(s) as failed", failed);
        }
        Ok(failed)
    }

    fn load_all(conn: &Connection) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Self::row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn load_one(conn: &Connection, id: MessageId) -> Result<Option<Message>> {
        let message = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
        let direction: i64 = row.get(2)?;
        let status: i64 = row.get(3)?;
        let timestamp: i64 = row.get(4)?;

        let direction = Direction::from_sql(direction).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                format!("unknown direction {}", direction).into(),
            )
        })?;
        let status = DeliveryStatus::from_sql(status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                format!("unknown status {}", status).into(),
            )
        })?;

        Ok(Message {
            id: row.get(0)?,
            text: row.get(1)?,
            direction,
            status,
            timestamp: timestamp.max(0) as u64,
        })
    }

    /// Run `op` against the open connection on the blocking pool
    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &SnapshotPublisher) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let snapshots = self.snapshots.clone();

        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ChatError::StorageError("message store lock poisoned".to_string()))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| ChatError::StorageError("message store is closed".to_string()))?;
            op(conn, &snapshots)
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<MessageId> {
        message.validate()?;

        self.with_connection(move |conn, snapshots| {
            conn.execute(
                "INSERT INTO messages (text, direction, status, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.text(),
                    message.direction().to_sql(),
                    message.status().to_sql(),
                    message.timestamp() as i64,
                ],
            )?;
            let id = conn.last_insert_rowid();

            let mut messages = snapshots.current().as_ref().clone();
            messages.push(message.persisted(id));
            snapshots.publish(messages);

            debug!("Inserted message {}", id);
            Ok(id)
        })
        .await
    }

    async fn update(&self, message: &Message) -> Result<()> {
        let message = message.clone();

        self.with_connection(move |conn, snapshots| {
            let stored = Self::load_one(conn, message.id)?
                .ok_or(ChatError::NotFoundError(message.id))?;

            if stored.direction != message.direction {
                return Err(ChatError::ValidationError(format!(
                    "message {} direction is fixed at {:?}",
                    message.id, stored.direction
                )));
            }
            if stored.status == message.status {
                debug!("Message {} already {:?}, nothing to update", message.id, message.status);
                return Ok(());
            }
            stored.advance(message.status)?;

            conn.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                params![message.status.to_sql(), message.id],
            )?;

            let mut messages = snapshots.current().as_ref().clone();
            if let Ok(pos) = messages.binary_search_by_key(&message.id, |m| m.id) {
                messages[pos].status = message.status;
            }
            snapshots.publish(messages);

            debug!("Message {} moved from {:?} to {:?}", message.id, stored.status, message.status);
            Ok(())
        })
        .await
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        self.with_connection(move |conn, _| Self::load_one(conn, id)).await
    }

    fn observe_all(&self) -> MessageFeed {
        self.snapshots.subscribe()
    }

    async fn close(&self) {
        let conn = self.conn.clone();
        let closed = tokio::task::spawn_blocking(move || match conn.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        })
        .await
        .unwrap_or(false);

        if closed {
            info!("Message database closed");
        }
    }
}
