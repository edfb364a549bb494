//! # Remote System Contract
//!
//! The sync engine ships change records to a remote system of record through
//! [`RemoteSystem`]. The remote must be idempotent per
//! `(entity_type, id, version)` and must report its own version when it
//! refuses a change, which is all the engine needs for conflict detection.
//!
//! ```text
//! ┌──────────────┐  push(item)   ┌──────────────────────┐
//! │  SyncEngine  │──────────────►│   RemoteSystem       │
//! │              │◄──────────────│                      │
//! └──────────────┘               │  WsRemote  (hub)     │
//!    Accepted { remote_version } │  MemoryRemote (local)│
//!    Conflict(RemoteState)       └──────────────────────┘
//!    Err(RemoteError)
//! ```

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use titan_core::{RemoteState, SyncItem, SyncOperation};

// =============================================================================
// Contract
// =============================================================================

/// Answer to a delivered change.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAck {
    /// The change was applied (or had already been applied).
    Accepted { remote_version: i64 },

    /// The remote holds a newer or diverging version of the entity.
    Conflict(RemoteState),
}

/// Failure talking to the remote.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Not connected or the remote is down.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// No answer within the request timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The remote refused the change for good (schema, authorization...).
    #[error("Rejected by remote: {0}")]
    Rejected(String),

    /// The local side gave up on the call (shutdown, cancellation).
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl RemoteError {
    /// Whether the remote itself flagged this failure as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }

    /// Errors that must never be retried regardless of their message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteError::Rejected(_) | RemoteError::Aborted(_))
    }
}

/// A remote system of record.
#[async_trait]
pub trait RemoteSystem: Send + Sync {
    /// Delivers one change record.
    async fn push(&self, item: &SyncItem) -> Result<RemoteAck, RemoteError>;
}

// =============================================================================
// In-process Remote
// =============================================================================

/// In-process system of record.
///
/// Applies the same version rules a real hub does: a push is accepted when
/// its version is above the stored one, repeated deliveries of the stored
/// version are acknowledged again, anything else is a conflict. Used by the
/// headless terminal when no hub is configured and by tests, which can
/// script failures with [`MemoryRemote::fail_next`].
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<String, RemoteState>,
    scripted: VecDeque<RemoteError>,
    delivered: Vec<SyncItem>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores remote state for an entity, as if another terminal pushed it.
    pub async fn seed(&self, queue_key: &str, state: RemoteState) {
        self.inner.lock().await.entities.insert(queue_key.to_string(), state);
    }

    /// Makes the next push fail with `error`. Calls stack up in order.
    pub async fn fail_next(&self, error: RemoteError) {
        self.inner.lock().await.scripted.push_back(error);
    }

    pub async fn get(&self, queue_key: &str) -> Option<RemoteState> {
        self.inner.lock().await.entities.get(queue_key).cloned()
    }

    /// Every accepted delivery, in arrival order.
    pub async fn delivered(&self) -> Vec<SyncItem> {
        self.inner.lock().await.delivered.clone()
    }
}

#[async_trait]
impl RemoteSystem for MemoryRemote {
    async fn push(&self, item: &SyncItem) -> Result<RemoteAck, RemoteError> {
        let mut state = self.inner.lock().await;

        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }

        let key = item.queue_key();
        let deleting = item.operation == SyncOperation::Delete;

        if let Some(stored) = state.entities.get(&key) {
            let duplicate = stored.version == item.version
                && stored.deleted == deleting
                && (deleting || stored.payload == item.payload);
            if duplicate {
                return Ok(RemoteAck::Accepted {
                    remote_version: stored.version,
                });
            }
            if item.version <= stored.version {
                return Ok(RemoteAck::Conflict(stored.clone()));
            }
        }

        state.entities.insert(
            key,
            RemoteState {
                payload: if deleting {
                    serde_json::Value::Null
                } else {
                    item.payload.clone()
                },
                version: item.version,
                timestamp: item.origin_timestamp,
                deleted: deleting,
            },
        );
        state.delivered.push(item.clone());

        Ok(RemoteAck::Accepted {
            remote_version: item.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use titan_core::ENTITY_PRODUCT;

    #[tokio::test]
    async fn test_newer_version_is_accepted() {
        let remote = MemoryRemote::new();
        let item = SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Create, json!({"price": 1}));

        assert_eq!(
            remote.push(&item).await.unwrap(),
            RemoteAck::Accepted { remote_version: 1 }
        );
        // Redelivery after a lost ack is acknowledged again.
        assert_eq!(
            remote.push(&item).await.unwrap(),
            RemoteAck::Accepted { remote_version: 1 }
        );
        assert_eq!(remote.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let remote = MemoryRemote::new();
        let stored = RemoteState {
            payload: json!({"price": 9}),
            version: 4,
            timestamp: Utc::now(),
            deleted: false,
        };
        remote.seed("product:p1", stored.clone()).await;

        let item = SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Update, json!({"price": 1}))
            .with_version(3);
        assert_eq!(remote.push(&item).await.unwrap(), RemoteAck::Conflict(stored));
    }

    #[tokio::test]
    async fn test_scripted_failures_come_first() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Timeout(100)).await;

        let item = SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Create, json!({}));
        assert_eq!(remote.push(&item).await, Err(RemoteError::Timeout(100)));
        assert!(remote.push(&item).await.is_ok());
    }

    #[test]
    fn test_error_classes() {
        assert!(RemoteError::Timeout(5).is_transient());
        assert!(RemoteError::Rejected("bad".into()).is_terminal());
        assert!(!RemoteError::Unavailable("down".into()).is_terminal());
    }
}
