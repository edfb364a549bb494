//! # Snapshot Repository
//!
//! Cached domain state (product catalog, inventory levels) keyed by entity.
//!
//! The catalog engine reads from here while offline; the sync engine writes
//! here when a conflict settles in favour of the remote state.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// A cached copy of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    entity_type: String,
    entity_id: String,
    payload: String,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = crate::DbError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Snapshot {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            payload: serde_json::from_str(&row.payload)?,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for the snapshot cache.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SnapshotRepository { pool }
    }

    /// Inserts or replaces the cached state of an entity.
    pub async fn put(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
        version: i64,
    ) -> DbResult<()> {
        let payload = serde_json::to_string(payload)?;

        debug!(entity_type = %entity_type, entity_id = %entity_id, version, "Caching snapshot");

        sqlx::query(
            r#"
            INSERT INTO snapshots (entity_type, entity_id, payload, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                payload = excluded.payload,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(payload)
        .bind(version)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets the cached state of an entity.
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> DbResult<Option<Snapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT entity_type, entity_id, payload, version, updated_at
            FROM snapshots
            WHERE entity_type = ?1 AND entity_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Snapshot::try_from).transpose()
    }

    /// Removes an entity from the cache. Returns whether a row existed.
    pub async fn delete(&self, entity_type: &str, entity_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM snapshots WHERE entity_type = ?1 AND entity_id = ?2")
            .bind(entity_type)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists every cached entity of one type, oldest update first.
    pub async fn list(&self, entity_type: &str) -> DbResult<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT entity_type, entity_id, payload, version, updated_at
            FROM snapshots
            WHERE entity_type = ?1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Snapshot::try_from).collect()
    }

    /// Counts cached entities of one type.
    pub async fn count(&self, entity_type: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots WHERE entity_type = ?1")
            .bind(entity_type)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Evicts stale cache entries of one type.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn delete_older_than(
        &self,
        entity_type: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM snapshots WHERE entity_type = ?1 AND updated_at < ?2")
            .bind(entity_type)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.snapshots();

        repo.put("product", "p1", &json!({"price": 100}), 1).await.unwrap();
        repo.put("product", "p1", &json!({"price": 120}), 2).await.unwrap();

        let snap = repo.get("product", "p1").await.unwrap().unwrap();
        assert_eq!(snap.payload, json!({"price": 120}));
        assert_eq!(snap.version, 2);
        assert_eq!(repo.count("product").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.snapshots();

        assert!(repo.get("product", "nope").await.unwrap().is_none());
        repo.put("product", "p1", &json!({}), 1).await.unwrap();
        assert!(repo.delete("product", "p1").await.unwrap());
        assert!(!repo.delete("product", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_evicts_only_stale_entries() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.snapshots();

        repo.put("product", "p1", &json!({}), 1).await.unwrap();
        repo.put("inventory", "i1", &json!({}), 1).await.unwrap();

        let evicted = repo
            .delete_older_than("product", Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(evicted, 0);

        let evicted = repo
            .delete_older_than("product", Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(repo.list("inventory").await.unwrap().len(), 1);
    }
}
