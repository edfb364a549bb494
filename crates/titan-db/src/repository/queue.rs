//! # Sync Queue Repository
//!
//! Durable, prioritized queue of pending change records, one row per entity.
//!
//! ## Two-Phase Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Crash-Safe Delivery Protocol                         │
//! │                                                                         │
//! │  enqueue(item)                                                         │
//! │       │  UPSERT on queue_key ("entity_type:id"), new seq               │
//! │       ▼                                                                 │
//! │  ┌──────────┐  claim_batch  ┌───────────┐  acknowledge(key, seq)       │
//! │  │ pending  │──────────────►│ in_flight │─────────────────► (deleted)   │
//! │  └──────────┘               └─────┬─────┘                               │
//! │       ▲                           │                                     │
//! │       │  requeue / release /      │  mark_failed  park_with_conflict  │
//! │       │  recover_in_flight        ├──────────► failed                   │
//! │       └───────────────────────────┤                                     │
//! │                                   └──────────► conflicted               │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A row is deleted only after the remote acknowledged it              │
//! │  • A crash while in_flight leaves the row; restart makes it pending    │
//! │  • Every transition is guarded by seq: a newer version enqueued        │
//! │    meanwhile is never acknowledged, failed or parked by mistake        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//! `priority_weight DESC, seq ASC`: strict across tiers, FIFO within a tier.
//! A requeued item gets a fresh seq and so moves to the back of its tier.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::conflict::insert as insert_conflict;
use titan_core::{
    QueueStatus, QueuedItem, SyncConflict, SyncItem, SyncOperation, SyncPriority,
};

const COLUMNS: &str = "entity_type, entity_id, operation, payload, origin_timestamp, version, \
     origin_device_id, priority, attempt_count, max_attempts, last_error, status, seq, enqueued_at";

/// Secondary indexes the queue can be queried by.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueIndex {
    /// All entries with a status, in drain order.
    Status(QueueStatus),
    /// All entries enqueued strictly before a point in time.
    EnqueuedBefore(DateTime<Utc>),
    /// All entries of one entity type.
    EntityType(String),
}

/// A queue row: the change record plus its delivery metadata.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub item: SyncItem,
    pub status: QueueStatus,
    pub seq: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn queue_key(&self) -> String {
        self.item.queue_key()
    }
}

impl From<QueueEntry> for QueuedItem {
    fn from(entry: QueueEntry) -> Self {
        QueuedItem {
            item: entry.item,
            seq: entry.seq,
        }
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    entity_type: String,
    entity_id: String,
    operation: SyncOperation,
    payload: String,
    origin_timestamp: DateTime<Utc>,
    version: i64,
    origin_device_id: String,
    priority: SyncPriority,
    attempt_count: i64,
    max_attempts: i64,
    last_error: Option<String>,
    status: QueueStatus,
    seq: i64,
    enqueued_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            item: SyncItem {
                id: row.entity_id,
                entity_type: row.entity_type,
                operation: row.operation,
                payload: serde_json::from_str(&row.payload)?,
                origin_timestamp: row.origin_timestamp,
                version: row.version,
                origin_device_id: row.origin_device_id,
                priority: row.priority,
                attempt_count: row.attempt_count.max(0) as u32,
                max_attempts: row.max_attempts.max(0) as u32,
                last_error: row.last_error,
            },
            status: row.status,
            seq: row.seq,
            enqueued_at: row.enqueued_at,
        })
    }
}

// =============================================================================
// Shared Statements
// =============================================================================
// Used inside larger transactions (see OutboxRepository::record_with_sync_item).
// park_with_conflict borrows the conflict log's insert the same way.
// Both start with a write so the transaction takes the write lock up front.

/// Hands out the next enqueue sequence number.
pub(crate) async fn next_seq(conn: &mut SqliteConnection) -> DbResult<i64> {
    let seq: i64 =
        sqlx::query_scalar("UPDATE sync_sequence SET value = value + 1 WHERE id = 1 RETURNING value")
            .fetch_one(conn)
            .await?;
    Ok(seq)
}

/// Inserts an item or replaces the queued item for the same entity.
///
/// The replacement goes back to `pending` with the new seq, whatever state
/// the older row was in.
pub(crate) async fn upsert(conn: &mut SqliteConnection, item: &SyncItem, seq: i64) -> DbResult<()> {
    let payload = serde_json::to_string(&item.payload)?;

    sqlx::query(
        r#"
        INSERT INTO sync_queue (
            queue_key, entity_type, entity_id, operation, payload,
            origin_timestamp, version, origin_device_id, priority, priority_weight,
            attempt_count, max_attempts, last_error, status, seq, enqueued_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, 'pending', ?14, ?15
        )
        ON CONFLICT (queue_key) DO UPDATE SET
            operation = excluded.operation,
            payload = excluded.payload,
            origin_timestamp = excluded.origin_timestamp,
            version = excluded.version,
            origin_device_id = excluded.origin_device_id,
            priority = excluded.priority,
            priority_weight = excluded.priority_weight,
            attempt_count = excluded.attempt_count,
            max_attempts = excluded.max_attempts,
            last_error = excluded.last_error,
            status = 'pending',
            seq = excluded.seq,
            enqueued_at = excluded.enqueued_at
        "#,
    )
    .bind(item.queue_key())
    .bind(&item.entity_type)
    .bind(&item.id)
    .bind(item.operation)
    .bind(payload)
    .bind(item.origin_timestamp)
    .bind(item.version)
    .bind(&item.origin_device_id)
    .bind(item.priority)
    .bind(item.priority.weight())
    .bind(i64::from(item.attempt_count))
    .bind(i64::from(item.max_attempts))
    .bind(&item.last_error)
    .bind(seq)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Queues a change, replacing any queued change for the same entity.
    ///
    /// ## Returns
    /// The seq assigned to the stored row.
    pub async fn enqueue(&self, item: &SyncItem) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let seq = next_seq(&mut tx).await?;
        upsert(&mut tx, item, seq).await?;
        tx.commit().await?;

        debug!(
            queue_key = %item.queue_key(),
            priority = %item.priority,
            seq,
            "Enqueued sync item"
        );
        Ok(seq)
    }

    /// Atomically moves up to `limit` pending items to `in_flight`.
    ///
    /// ## Returns
    /// The claimed items in drain order.
    pub async fn claim_batch(&self, limit: usize) -> DbResult<Vec<QueuedItem>> {
        let sql = format!(
            r#"
            UPDATE sync_queue SET status = 'in_flight'
            WHERE queue_key IN (
                SELECT queue_key FROM sync_queue
                WHERE status = 'pending'
                ORDER BY priority_weight DESC, seq ASC
                LIMIT ?1
            )
            RETURNING {COLUMNS}
            "#
        );

        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING has no defined order.
        let mut entries = rows
            .into_iter()
            .map(QueueEntry::try_from)
            .collect::<DbResult<Vec<_>>>()?;
        entries.sort_by(|a, b| {
            b.item
                .priority
                .weight()
                .cmp(&a.item.priority.weight())
                .then(a.seq.cmp(&b.seq))
        });

        Ok(entries.into_iter().map(QueuedItem::from).collect())
    }

    /// Removes a claimed row once it is settled (delivered, or superseded by
    /// the remote state).
    ///
    /// ## Returns
    /// `false` if the row was replaced by a newer version in the meantime.
    pub async fn acknowledge(&self, queue_key: &str, seq: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE queue_key = ?1 AND seq = ?2")
            .bind(queue_key)
            .bind(seq)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Puts an item back as `pending` at the back of its priority tier,
    /// storing the item's current attempt count, error, version and payload.
    ///
    /// ## Returns
    /// The new seq, or `None` if the row was replaced meanwhile.
    pub async fn requeue(&self, item: &SyncItem, seq: i64) -> DbResult<Option<i64>> {
        let payload = serde_json::to_string(&item.payload)?;

        let mut tx = self.pool.begin().await?;
        let new_seq = next_seq(&mut tx).await?;
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                seq = ?3,
                payload = ?4,
                version = ?5,
                attempt_count = ?6,
                last_error = ?7
            WHERE queue_key = ?1 AND seq = ?2
            "#,
        )
        .bind(item.queue_key())
        .bind(seq)
        .bind(new_seq)
        .bind(payload)
        .bind(item.version)
        .bind(i64::from(item.attempt_count))
        .bind(&item.last_error)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((result.rows_affected() > 0).then_some(new_seq))
    }

    /// Returns unprocessed claimed rows to `pending`, keeping their place.
    pub async fn release(&self, claimed: &[(String, i64)]) -> DbResult<u64> {
        let mut released = 0;
        let mut tx = self.pool.begin().await?;
        for (queue_key, seq) in claimed {
            let result = sqlx::query(
                "UPDATE sync_queue SET status = 'pending' \
                 WHERE queue_key = ?1 AND seq = ?2 AND status = 'in_flight'",
            )
            .bind(queue_key)
            .bind(seq)
            .execute(&mut *tx)
            .await?;
            released += result.rows_affected();
        }
        tx.commit().await?;

        Ok(released)
    }

    /// Moves a row to the terminal `failed` state.
    pub async fn mark_failed(&self, item: &SyncItem, seq: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'failed',
                attempt_count = ?3,
                last_error = ?4
            WHERE queue_key = ?1 AND seq = ?2
            "#,
        )
        .bind(item.queue_key())
        .bind(seq)
        .bind(i64::from(item.attempt_count))
        .bind(&item.last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Parks a row and logs the conflict that needs an operator, in one SQL
    /// transaction. Either both land or the row stays claimed.
    ///
    /// ## Returns
    /// `false` if the row was replaced meanwhile; the conflict is logged anyway.
    pub async fn park_with_conflict(&self, seq: i64, conflict: &SyncConflict) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'conflicted' WHERE queue_key = ?1 AND seq = ?2",
        )
        .bind(conflict.local.queue_key())
        .bind(seq)
        .execute(&mut *tx)
        .await?;
        insert_conflict(&mut tx, conflict).await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Startup recovery: anything still `in_flight` was interrupted and is
    /// delivered again.
    pub async fn recover_in_flight(&self) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'in_flight'")
                .execute(&self.pool)
                .await?;

        if result.rows_affected() > 0 {
            info!(
                recovered = result.rows_affected(),
                "Recovered interrupted sync items"
            );
        }
        Ok(result.rows_affected())
    }

    /// Gives every failed row a fresh set of attempts.
    pub async fn retry_failed(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'pending', attempt_count = 0 WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Gets the queued row for a key.
    pub async fn get(&self, queue_key: &str) -> DbResult<Option<QueueEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE queue_key = ?1");
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(queue_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// Looks rows up by a secondary index.
    pub async fn query_by_index(&self, index: &QueueIndex) -> DbResult<Vec<QueueEntry>> {
        let rows = match index {
            QueueIndex::Status(status) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM sync_queue WHERE status = ?1 \
                     ORDER BY priority_weight DESC, seq ASC"
                );
                sqlx::query_as::<_, QueueRow>(&sql)
                    .bind(*status)
                    .fetch_all(&self.pool)
                    .await?
            }
            QueueIndex::EnqueuedBefore(cutoff) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM sync_queue WHERE enqueued_at < ?1 ORDER BY seq ASC"
                );
                sqlx::query_as::<_, QueueRow>(&sql)
                    .bind(*cutoff)
                    .fetch_all(&self.pool)
                    .await?
            }
            QueueIndex::EntityType(entity_type) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM sync_queue WHERE entity_type = ?1 ORDER BY seq ASC"
                );
                sqlx::query_as::<_, QueueRow>(&sql)
                    .bind(entity_type)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// Counts rows with a status.
    pub async fn count_by_status(&self, status: QueueStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts rows still heading for the remote (`pending` or `in_flight`).
    pub async fn count_active(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'in_flight')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts every row.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;
    use titan_core::{ENTITY_INVENTORY, ENTITY_PRODUCT, ENTITY_TRANSACTION};

    fn item(entity_type: &str, id: &str, priority: SyncPriority) -> SyncItem {
        SyncItem::new(entity_type, id, SyncOperation::Update, json!({ "id": id }))
            .with_priority(priority)
    }

    async fn repo() -> SyncQueueRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().sync_queue()
    }

    fn conflict_on(local: &SyncItem) -> SyncConflict {
        let remote = titan_core::RemoteState {
            payload: json!({ "id": local.id, "remote": true }),
            version: local.version + 1,
            timestamp: Utc::now(),
            deleted: false,
        };
        SyncConflict::new(local.clone(), remote, titan_core::ConflictKind::Version)
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_same_entity() {
        let repo = repo().await;

        repo.enqueue(&item(ENTITY_PRODUCT, "p1", SyncPriority::Normal))
            .await
            .unwrap();
        let newer = item(ENTITY_PRODUCT, "p1", SyncPriority::Normal)
            .with_version(2)
            .with_priority(SyncPriority::High);
        repo.enqueue(&newer).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let entry = repo.get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.item.version, 2);
        assert_eq!(entry.item.priority, SyncPriority::High);

        // Same id under another entity type is a different entity.
        repo.enqueue(&item(ENTITY_INVENTORY, "p1", SyncPriority::Normal))
            .await
            .unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_fifo() {
        let repo = repo().await;

        repo.enqueue(&item(ENTITY_PRODUCT, "low", SyncPriority::Low)).await.unwrap();
        repo.enqueue(&item(ENTITY_PRODUCT, "n1", SyncPriority::Normal)).await.unwrap();
        repo.enqueue(&item(ENTITY_TRANSACTION, "c1", SyncPriority::Critical)).await.unwrap();
        repo.enqueue(&item(ENTITY_PRODUCT, "n2", SyncPriority::Normal)).await.unwrap();
        repo.enqueue(&item(ENTITY_TRANSACTION, "c2", SyncPriority::Critical)).await.unwrap();

        let claimed = repo.claim_batch(10).await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|q| q.item.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "n1", "n2", "low"]);

        assert_eq!(repo.count_by_status(QueueStatus::InFlight).await.unwrap(), 5);
        assert!(repo.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_limit() {
        let repo = repo().await;
        for i in 0..5 {
            repo.enqueue(&item(ENTITY_PRODUCT, &format!("p{i}"), SyncPriority::Normal))
                .await
                .unwrap();
        }

        assert_eq!(repo.claim_batch(2).await.unwrap().len(), 2);
        assert_eq!(repo.count_by_status(QueueStatus::Pending).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_newer_version() {
        let repo = repo().await;
        repo.enqueue(&item(ENTITY_PRODUCT, "p1", SyncPriority::Normal))
            .await
            .unwrap();

        let claimed = repo.claim_batch(1).await.unwrap();
        let old_seq = claimed[0].seq;

        // A newer change lands while the old one is on the wire.
        repo.enqueue(&item(ENTITY_PRODUCT, "p1", SyncPriority::Normal).with_version(2))
            .await
            .unwrap();

        assert!(!repo.acknowledge("product:p1", old_seq).await.unwrap());
        let entry = repo.get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.item.version, 2);
    }

    #[tokio::test]
    async fn test_requeue_moves_to_back_of_tier() {
        let repo = repo().await;
        repo.enqueue(&item(ENTITY_PRODUCT, "a", SyncPriority::Normal)).await.unwrap();
        repo.enqueue(&item(ENTITY_PRODUCT, "b", SyncPriority::Normal)).await.unwrap();

        let mut claimed = repo.claim_batch(1).await.unwrap();
        let mut first = claimed.remove(0);
        assert_eq!(first.item.id, "a");

        first.item.record_failure("connection reset");
        let new_seq = repo.requeue(&first.item, first.seq).await.unwrap();
        assert!(new_seq.is_some());

        let order: Vec<String> = repo
            .claim_batch(10)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.item.id)
            .collect();
        assert_eq!(order, vec!["b", "a"]);

        let a = repo.get("product:a").await.unwrap().unwrap();
        assert_eq!(a.item.attempt_count, 1);
        assert_eq!(a.item.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_recover_in_flight_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            let repo = db.sync_queue();
            repo.enqueue(&item(ENTITY_TRANSACTION, "t1", SyncPriority::High)).await.unwrap();
            repo.enqueue(&item(ENTITY_TRANSACTION, "t2", SyncPriority::High)).await.unwrap();
            repo.claim_batch(1).await.unwrap();
            // Process dies here, t1 never acknowledged.
            db.close().await;
        }

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let repo = db.sync_queue();
        assert_eq!(repo.count_by_status(QueueStatus::InFlight).await.unwrap(), 1);
        assert_eq!(repo.recover_in_flight().await.unwrap(), 1);
        assert_eq!(repo.count_by_status(QueueStatus::Pending).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_only_touches_in_flight() {
        let repo = repo().await;
        repo.enqueue(&item(ENTITY_PRODUCT, "a", SyncPriority::Normal)).await.unwrap();
        repo.enqueue(&item(ENTITY_PRODUCT, "b", SyncPriority::Normal)).await.unwrap();

        let claimed = repo.claim_batch(2).await.unwrap();
        repo.mark_failed(&claimed[0].item, claimed[0].seq).await.unwrap();

        let keys: Vec<(String, i64)> = claimed
            .iter()
            .map(|q| (q.item.queue_key(), q.seq))
            .collect();
        assert_eq!(repo.release(&keys).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(QueueStatus::Failed).await.unwrap(), 1);
        assert_eq!(repo.count_active().await.unwrap(), 1);

        assert_eq!(repo.retry_failed().await.unwrap(), 1);
        assert_eq!(repo.count_active().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_by_index() {
        let repo = repo().await;
        repo.enqueue(&item(ENTITY_PRODUCT, "a", SyncPriority::Normal)).await.unwrap();
        repo.enqueue(&item(ENTITY_INVENTORY, "b", SyncPriority::Normal)).await.unwrap();

        let claimed = repo.claim_batch(1).await.unwrap();
        repo.park_with_conflict(claimed[0].seq, &conflict_on(&claimed[0].item))
            .await
            .unwrap();

        let conflicted = repo
            .query_by_index(&QueueIndex::Status(QueueStatus::Conflicted))
            .await
            .unwrap();
        assert_eq!(conflicted.len(), 1);
        assert_eq!(conflicted[0].item.id, "a");

        let inventory = repo
            .query_by_index(&QueueIndex::EntityType(ENTITY_INVENTORY.to_string()))
            .await
            .unwrap();
        assert_eq!(inventory.len(), 1);

        let older = repo
            .query_by_index(&QueueIndex::EnqueuedBefore(Utc::now() + chrono::Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(older.len(), 2);
        let none = repo
            .query_by_index(&QueueIndex::EnqueuedBefore(Utc::now() - chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_park_with_conflict_is_all_or_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_queue();
        repo.enqueue(&item(ENTITY_PRODUCT, "a", SyncPriority::Normal)).await.unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        let conflict = conflict_on(&claimed[0].item);

        // Conflict log unwritable: the park must not land either.
        sqlx::query("ALTER TABLE sync_conflicts RENAME TO sync_conflicts_offline")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(repo.park_with_conflict(claimed[0].seq, &conflict).await.is_err());
        let entry = repo.get("product:a").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::InFlight);

        sqlx::query("ALTER TABLE sync_conflicts_offline RENAME TO sync_conflicts")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(repo.park_with_conflict(claimed[0].seq, &conflict).await.unwrap());
        let entry = repo.get("product:a").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Conflicted);
        assert_eq!(db.conflicts().count_unresolved().await.unwrap(), 1);
    }
}
