//! SQLite-backed offline message queue.
//!
//! Messages for unreachable peers are queued durably and retried with
//! exponential backoff. The hot queries are indexed on
//! `(recipient_id, status)` and `(next_retry_at, status)`.

use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

use pactnet_core::constants::OFFLINE_QUEUE_MAX_AGE_SECS;
use pactnet_core::types::{EntityId, Timestamp};
use pactnet_core::PactError;

const MAX_RETRIES: u32 = 5;
const RETRY_BASE_SECS: i64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Delivered,
    Failed,
}

impl QueueStatus {
    fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending   => "pending",
            QueueStatus::Delivered => "delivered",
            QueueStatus::Failed    => "failed",
        }
    }
}

/// One queued wire message (payload is the serialized envelope).
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub message_id: String,
    pub recipient_id: EntityId,
    pub sender_id: EntityId,
    pub msg_type: String,
    pub payload: String,
    pub retry_count: u32,
    pub next_retry_at: Timestamp,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Durable queue over a single SQLite file. The connection is serialized
/// behind an async mutex; statements are short and index-backed.
pub struct OfflineQueue {
    conn: Mutex<Connection>,
}

impl OfflineQueue {
    pub fn open(path: &Path) -> Result<Self, PactError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PactError::Persistence(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| PactError::Persistence(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id    TEXT PRIMARY KEY,
                recipient_id  TEXT NOT NULL,
                sender_id     TEXT NOT NULL,
                msg_type      TEXT NOT NULL,
                payload       TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'pending',
                retry_count   INTEGER NOT NULL DEFAULT 0,
                next_retry_at INTEGER NOT NULL,
                created_at    INTEGER NOT NULL,
                expires_at    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recipient_status
                ON messages (recipient_id, status);
            CREATE INDEX IF NOT EXISTS idx_next_retry
                ON messages (next_retry_at, status);
            CREATE INDEX IF NOT EXISTS idx_expires
                ON messages (expires_at);
            "#,
        )
        .map_err(|e| PactError::Persistence(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Queue a message for an offline recipient.
    pub async fn enqueue(&self, msg: &QueuedMessage) -> Result<(), PactError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages
               (message_id, recipient_id, sender_id, msg_type, payload, status,
                retry_count, next_retry_at, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9)",
            rusqlite::params![
                msg.message_id,
                msg.recipient_id.as_str(),
                msg.sender_id.as_str(),
                msg.msg_type,
                msg.payload,
                msg.retry_count,
                msg.next_retry_at,
                msg.created_at,
                msg.expires_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PactError::DuplicateTransaction(msg.message_id.clone())
            }
            other => PactError::Persistence(other.to_string()),
        })?;
        Ok(())
    }

    /// Pending messages for a recipient that just came online.
    pub async fn pending_for(
        &self,
        recipient: &EntityId,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, PactError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT message_id, recipient_id, sender_id, msg_type, payload,
                        retry_count, next_retry_at, created_at, expires_at
                 FROM messages
                 WHERE recipient_id = ?1 AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT ?2",
            )
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![recipient.as_str(), limit as i64], row_to_message)
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        collect_rows(rows)
    }

    /// Pending messages whose retry time has come.
    pub async fn due_for_retry(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, PactError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT message_id, recipient_id, sender_id, msg_type, payload,
                        retry_count, next_retry_at, created_at, expires_at
                 FROM messages
                 WHERE status = 'pending' AND next_retry_at <= ?1
                 ORDER BY next_retry_at ASC
                 LIMIT ?2",
            )
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![now, limit as i64], row_to_message)
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        collect_rows(rows)
    }

    pub async fn mark_delivered(&self, message_id: &str) -> Result<(), PactError> {
        self.set_status(message_id, QueueStatus::Delivered).await
    }

    /// Record a delivery failure: schedule an exponential-backoff retry, or
    /// fail the message permanently once retries are exhausted. Returns true
    /// if another retry was scheduled.
    pub async fn mark_failed(&self, message_id: &str, now: Timestamp) -> Result<bool, PactError> {
        let conn = self.conn.lock().await;
        let retry_count: Option<u32> = conn
            .query_row(
                "SELECT retry_count FROM messages WHERE message_id = ?1",
                rusqlite::params![message_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(PactError::Persistence(other.to_string())),
            })?;

        let Some(retry_count) = retry_count else {
            return Ok(false);
        };

        if retry_count + 1 >= MAX_RETRIES {
            conn.execute(
                "UPDATE messages SET status = 'failed' WHERE message_id = ?1",
                rusqlite::params![message_id],
            )
            .map_err(|e| PactError::Persistence(e.to_string()))?;
            tracing::warn!(message_id, "offline message failed permanently");
            return Ok(false);
        }

        let backoff = RETRY_BASE_SECS * (1i64 << retry_count);
        conn.execute(
            "UPDATE messages
             SET retry_count = retry_count + 1, next_retry_at = ?2
             WHERE message_id = ?1",
            rusqlite::params![message_id, now + backoff],
        )
        .map_err(|e| PactError::Persistence(e.to_string()))?;
        Ok(true)
    }

    /// Purge delivered and over-age messages. Returns how many were removed.
    pub async fn cleanup_expired(&self, now: Timestamp) -> Result<usize, PactError> {
        let conn = self.conn.lock().await;
        let cutoff = now - OFFLINE_QUEUE_MAX_AGE_SECS;
        let n = conn
            .execute(
                "DELETE FROM messages
                 WHERE status = 'delivered' OR expires_at <= ?1 OR created_at <= ?2",
                rusqlite::params![now, cutoff],
            )
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        Ok(n)
    }

    pub async fn pending_count(&self) -> Result<u64, PactError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE status = 'pending'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| PactError::Persistence(e.to_string()))
    }

    async fn set_status(&self, message_id: &str, status: QueueStatus) -> Result<(), PactError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE messages SET status = ?2 WHERE message_id = ?1",
            rusqlite::params![message_id, status.as_str()],
        )
        .map_err(|e| PactError::Persistence(e.to_string()))?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedMessage> {
    Ok(QueuedMessage {
        message_id: row.get(0)?,
        recipient_id: EntityId::new(row.get::<_, String>(1)?),
        sender_id: EntityId::new(row.get::<_, String>(2)?),
        msg_type: row.get(3)?,
        payload: row.get(4)?,
        retry_count: row.get(5)?,
        next_retry_at: row.get(6)?,
        created_at: row.get(7)?,
        expires_at: row.get(8)?,
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<QueuedMessage>>,
) -> Result<Vec<QueuedMessage>, PactError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| PactError::Persistence(e.to_string()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_queue(name: &str) -> OfflineQueue {
        let path = std::env::temp_dir().join(format!(
            "pactnet_queue_{}_{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        OfflineQueue::open(&path).unwrap()
    }

    fn msg(id: &str, recipient: &str, now: Timestamp) -> QueuedMessage {
        QueuedMessage {
            message_id: id.into(),
            recipient_id: recipient.into(),
            sender_id: "sender".into(),
            msg_type: "delegate".into(),
            payload: "{}".into(),
            retry_count: 0,
            next_retry_at: now,
            created_at: now,
            expires_at: now + 300,
        }
    }

    #[tokio::test]
    async fn enqueue_and_drain_for_recipient() {
        let q = temp_queue("drain");
        q.enqueue(&msg("m1", "bob", 100)).await.unwrap();
        q.enqueue(&msg("m2", "bob", 101)).await.unwrap();
        q.enqueue(&msg("m3", "carol", 102)).await.unwrap();

        let pending = q.pending_for(&"bob".into(), 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_id, "m1");

        q.mark_delivered("m1").await.unwrap();
        let pending = q.pending_for(&"bob".into(), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let q = temp_queue("dup");
        q.enqueue(&msg("m1", "bob", 100)).await.unwrap();
        let err = q.enqueue(&msg("m1", "bob", 100)).await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_TRANSACTION");
    }

    #[tokio::test]
    async fn retry_backoff_schedules_then_fails_permanently() {
        let q = temp_queue("retry");
        q.enqueue(&msg("m1", "bob", 100)).await.unwrap();

        // First failures reschedule with growing backoff.
        assert!(q.mark_failed("m1", 100).await.unwrap());
        let due_now = q.due_for_retry(100, 10).await.unwrap();
        assert!(due_now.is_empty());
        let due_later = q.due_for_retry(100 + RETRY_BASE_SECS, 10).await.unwrap();
        assert_eq!(due_later.len(), 1);
        assert_eq!(due_later[0].retry_count, 1);

        // Exhaust retries.
        let mut rescheduled = true;
        for _ in 0..MAX_RETRIES {
            rescheduled = q.mark_failed("m1", 200).await.unwrap();
        }
        assert!(!rescheduled);
        assert!(q.pending_for(&"bob".into(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_and_delivered() {
        let q = temp_queue("cleanup");
        q.enqueue(&msg("m1", "bob", 100)).await.unwrap();
        q.enqueue(&msg("m2", "bob", 100)).await.unwrap();
        q.mark_delivered("m2").await.unwrap();

        // m1 expires at 400, m2 is delivered: both removed at t=500.
        let removed = q.cleanup_expired(500).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(q.pending_count().await.unwrap(), 0);
    }
}
