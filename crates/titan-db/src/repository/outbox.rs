//! # Transaction Outbox Repository
//!
//! Locally completed transactions waiting for the remote system to confirm them.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (transaction completed at the till)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT INTO transaction_outbox (id, payload, 'pending')    │   │
//! │  │                                                                 │   │
//! │  │  2. UPSERT INTO sync_queue ('transaction:<id>', payload, ...)  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail (atomicity guaranteed)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC ENGINE DRAIN (async)                            │   │
//! │  │                                                                 │   │
//! │  │  a. Push the queued item                                       │   │
//! │  │  b. On ack:     mark_confirmed(id)                             │   │
//! │  │  c. On failure: record_retry(id, error)                        │   │
//! │  │  d. Exhausted:  mark_failed(id, error)                         │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • The transaction is never lost (it's in local DB)                    │
//! │  • The sync entry is never orphaned (same transaction)                 │
//! │  • Offline? No problem - entries queue up                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::queue;
use titan_core::{OutboxStatus, SyncItem};

/// One outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    payload: String,
    status: OutboxStatus,
    retry_count: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            id: row.id,
            payload: serde_json::from_str(&row.payload)?,
            status: row.status,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for transaction outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Records a transaction without queuing it.
    pub async fn record(&self, id: &str, payload: &Value) -> DbResult<OutboxEntry> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, id, payload).await
    }

    /// Records a transaction and queues its change record in one SQL
    /// transaction.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let item = SyncItem::new(ENTITY_TRANSACTION, &sale_id, SyncOperation::Create, payload.clone())
    ///     .with_priority(SyncPriority::High);
    /// db.outbox().record_with_sync_item(&sale_id, &payload, &item).await?;
    /// ```
    pub async fn record_with_sync_item(
        &self,
        id: &str,
        payload: &Value,
        item: &SyncItem,
    ) -> DbResult<(OutboxEntry, i64)> {
        let mut tx = self.pool.begin().await?;
        let entry = insert(&mut tx, id, payload).await?;
        let seq = queue::next_seq(&mut tx).await?;
        queue::upsert(&mut tx, item, seq).await?;
        tx.commit().await?;

        debug!(transaction_id = %id, seq, "Recorded transaction for sync");
        Ok((entry, seq))
    }

    /// Gets an entry by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<OutboxEntry>> {
        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, payload, status, retry_count, last_error, created_at, updated_at
            FROM transaction_outbox
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxEntry::try_from).transpose()
    }

    /// Lists entries with a status, oldest first.
    pub async fn list_by_status(&self, status: OutboxStatus, limit: u32) -> DbResult<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, payload, status, retry_count, last_error, created_at, updated_at
            FROM transaction_outbox
            WHERE status = ?1
            ORDER BY created_at ASC
            LIMIT ?2
            "#,
        )
        .bind(status)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    /// Marks an entry as confirmed by the remote system.
    pub async fn mark_confirmed(&self, id: &str) -> DbResult<bool> {
        self.set_status(id, OutboxStatus::Confirmed, None).await
    }

    /// Marks an entry as permanently failed.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<bool> {
        self.set_status(id, OutboxStatus::Failed, Some(error)).await
    }

    /// Records a failed delivery attempt that will be retried.
    pub async fn record_retry(&self, id: &str, error: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_outbox SET
                retry_count = retry_count + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, id: &str, status: OutboxStatus, error: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_outbox SET
                status = ?2,
                last_error = COALESCE(?3, last_error),
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts entries with a status.
    pub async fn count_by_status(&self, status: OutboxStatus) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transaction_outbox WHERE status = ?1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes confirmed entries older than `days_old` days.
    ///
    /// Pending and failed entries are never cleaned up.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn cleanup_confirmed(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));

        let result = sqlx::query(
            "DELETE FROM transaction_outbox WHERE status = 'confirmed' AND updated_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

async fn insert(conn: &mut sqlx::SqliteConnection, id: &str, payload: &Value) -> DbResult<OutboxEntry> {
    let now = Utc::now();
    let entry = OutboxEntry {
        id: id.to_string(),
        payload: payload.clone(),
        status: OutboxStatus::Pending,
        retry_count: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    };

    let result = sqlx::query(
        r#"
        INSERT INTO transaction_outbox (id, payload, status, retry_count, last_error, created_at, updated_at)
        VALUES (?1, ?2, ?3, 0, NULL, ?4, ?4)
        "#,
    )
    .bind(&entry.id)
    .bind(serde_json::to_string(payload)?)
    .bind(entry.status)
    .bind(now)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(entry),
        Err(err) => match DbError::from(err) {
            DbError::UniqueViolation { .. } => Err(DbError::duplicate("transaction_id", id)),
            other => Err(other),
        },
    }
}
