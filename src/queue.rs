//! Durable per-user event queues.
//!
//! One FIFO per `(namespace, user, kind)` key, stored in SQLite so queued
//! events survive restarts. [`EventQueue::pop`] is a single
//! `DELETE ... RETURNING` statement: two concurrent callers can never
//! observe and remove the same head.

use std::fmt;

use sqlx::SqlitePool;
use tracing::trace;

use crate::event::{EventKind, RawEvent};

/// Identifies one queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    /// Bot namespace.
    pub namespace: String,
    /// Platform user id.
    pub user_id: String,
    /// Message or postback queue.
    pub kind: EventKind,
}

impl QueueKey {
    /// Build a key.
    pub fn new(namespace: impl Into<String>, user_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            namespace: namespace.into(),
            user_id: user_id.into(),
            kind,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.user_id, self.kind)
    }
}

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The event could not be encoded for storage.
    #[error("failed to encode event: {0}")]
    Encode(serde_json::Error),

    /// A popped entry could not be decoded. The entry is gone.
    #[error("queue entry {id} is corrupt: {source}")]
    Corrupt {
        /// Row id of the removed entry.
        id: i64,
        /// Decode failure.
        source: serde_json::Error,
    },
}

/// SQLite-backed event queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    db: SqlitePool,
}

impl EventQueue {
    /// Create a queue backed by the given pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// The pool this queue lives in.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Append an event to the tail of a queue. Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded or the insert fails.
    pub async fn push(&self, key: &QueueKey, event: &RawEvent) -> Result<i64, QueueError> {
        let payload = serde_json::to_string(event).map_err(QueueError::Encode)?;
        let result = sqlx::query(
            "INSERT INTO event_queue (namespace, user_id, kind, payload) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(&payload)
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        trace!(%key, id, "event pushed");
        Ok(id)
    }

    /// Remove and return the oldest event of a queue, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupt`] if the removed entry cannot be
    /// decoded, or a database error.
    pub async fn pop(&self, key: &QueueKey) -> Result<Option<RawEvent>, QueueError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "DELETE FROM event_queue WHERE id = ( \
                 SELECT id FROM event_queue \
                 WHERE namespace = ?1 AND user_id = ?2 AND kind = ?3 \
                 ORDER BY id ASC LIMIT 1 \
             ) RETURNING id, payload",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .fetch_optional(&self.db)
        .await?;

        let Some((id, payload)) = row else {
            trace!(%key, "queue empty");
            return Ok(None);
        };
        trace!(%key, id, "event popped");
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|source| QueueError::Corrupt { id, source })
    }

    /// Number of events waiting on a queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn depth(&self, key: &QueueKey) -> Result<u64, QueueError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM event_queue WHERE namespace = ?1 AND user_id = ?2 AND kind = ?3",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .fetch_one(&self.db)
        .await?;
        // count(*) is never negative.
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
