//! # Conflict Log Repository
//!
//! Every conflict the sync engine detects is written here, including the ones
//! settled automatically. Unresolved rows are what an operator sees.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use titan_core::{ConflictKind, ConflictStrategy, SyncConflict};

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    local_item: String,
    remote_state: String,
    kind: ConflictKind,
    resolution: Option<ConflictStrategy>,
    detected_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConflictRow> for SyncConflict {
    type Error = DbError;

    fn try_from(row: ConflictRow) -> Result<Self, Self::Error> {
        Ok(SyncConflict {
            id: Uuid::parse_str(&row.id).map_err(|e| DbError::Serialization(e.to_string()))?,
            local: serde_json::from_str(&row.local_item)?,
            remote: serde_json::from_str(&row.remote_state)?,
            kind: row.kind,
            resolution: row.resolution,
            detected_at: row.detected_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Writes one conflict row. Shared with the queue's park transaction.
pub(crate) async fn insert(conn: &mut SqliteConnection, conflict: &SyncConflict) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_conflicts (
            id, queue_key, local_item, remote_state, kind,
            resolution, detected_at, resolved_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(conflict.id.to_string())
    .bind(conflict.local.queue_key())
    .bind(serde_json::to_string(&conflict.local)?)
    .bind(serde_json::to_string(&conflict.remote)?)
    .bind(conflict.kind)
    .bind(conflict.resolution)
    .bind(conflict.detected_at)
    .bind(conflict.resolved_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Repository for the conflict log.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    /// Stores a conflict (resolved or not).
    pub async fn insert(&self, conflict: &SyncConflict) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, conflict).await
    }

    /// Gets a conflict by id.
    pub async fn get(&self, id: Uuid) -> DbResult<Option<SyncConflict>> {
        let row = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT id, local_item, remote_state, kind, resolution, detected_at, resolved_at
            FROM sync_conflicts
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncConflict::try_from).transpose()
    }

    /// Lists conflicts waiting for an operator, oldest first.
    pub async fn list_unresolved(&self) -> DbResult<Vec<SyncConflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT id, local_item, remote_state, kind, resolution, detected_at, resolved_at
            FROM sync_conflicts
            WHERE resolved_at IS NULL
            ORDER BY detected_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncConflict::try_from).collect()
    }

    /// Lists the most recent conflicts, newest first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<SyncConflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT id, local_item, remote_state, kind, resolution, detected_at, resolved_at
            FROM sync_conflicts
            ORDER BY detected_at DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncConflict::try_from).collect()
    }

    /// Settles an open conflict.
    ///
    /// ## Returns
    /// `false` if the conflict doesn't exist or was already resolved.
    pub async fn mark_resolved(&self, id: Uuid, strategy: ConflictStrategy) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts SET resolution = ?2, resolved_at = ?3
            WHERE id = ?1 AND resolved_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(strategy)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts conflicts waiting for an operator.
    pub async fn count_unresolved(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_conflicts WHERE resolved_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;
    use titan_core::{RemoteState, SyncItem, SyncOperation, ENTITY_PRODUCT};

    fn conflict() -> SyncConflict {
        let local = SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Update, json!({"price": 1}));
        let remote = RemoteState {
            payload: json!({"price": 2}),
            version: 4,
            timestamp: Utc::now(),
            deleted: false,
        };
        SyncConflict::new(local, remote, ConflictKind::Version)
    }

    #[tokio::test]
    async fn test_unresolved_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.conflicts();

        let open = conflict();
        repo.insert(&open).await.unwrap();

        let mut settled = conflict();
        settled.mark_resolved(ConflictStrategy::LatestWins);
        repo.insert(&settled).await.unwrap();

        let unresolved = repo.list_unresolved().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, open.id);
        assert_eq!(unresolved[0].remote.version, 4);

        assert!(repo.mark_resolved(open.id, ConflictStrategy::ServerWins).await.unwrap());
        assert!(!repo.mark_resolved(open.id, ConflictStrategy::ClientWins).await.unwrap());
        assert_eq!(repo.count_unresolved().await.unwrap(), 0);

        let stored = repo.get(open.id).await.unwrap().unwrap();
        assert_eq!(stored.resolution, Some(ConflictStrategy::ServerWins));
        assert!(stored.resolved_at.is_some());
        assert_eq!(repo.list_recent(10).await.unwrap().len(), 2);
    }
}
