//! # Sync Domain Types
//!
//! Core types that describe a locally observed change and its journey to the
//! remote system of record.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Domain Types                               │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    SyncItem     │   │    SyncBatch    │   │  SyncConflict   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (entity)    │   │  batch_id       │   │  id (UUID)      │       │
//! │  │  entity_type    │   │  items[]        │   │  local item     │       │
//! │  │  operation      │   │  status         │   │  remote state   │       │
//! │  │  version        │   │  counters       │   │  kind           │       │
//! │  │  priority       │   └─────────────────┘   │  resolution?    │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SyncPriority   │   │   QueueStatus   │   │ConflictStrategy │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Critical  100  │   │  Pending        │   │  ClientWins     │       │
//! │  │  High       75  │   │  InFlight       │   │  ServerWins     │       │
//! │  │  Normal     50  │   │  Failed         │   │  LatestWins     │       │
//! │  │  Low        25  │   │  Conflicted     │   │  Merge          │       │
//! │  │  Background 10  │   └─────────────────┘   │  Manual         │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Queue Identity
//! A `SyncItem` is identified in the queue by its `(entity_type, id)` pair,
//! rendered as the queue key `"entity_type:id"`. At most one item per key is
//! ever queued; a newer change for the same entity replaces the older one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// =============================================================================
// Entity Types
// =============================================================================

/// Entity type for catalog products.
pub const ENTITY_PRODUCT: &str = "product";

/// Entity type for completed sales transactions.
pub const ENTITY_TRANSACTION: &str = "transaction";

/// Entity type for inventory deltas.
pub const ENTITY_INVENTORY: &str = "inventory";

// =============================================================================
// Sync Operation
// =============================================================================

/// What happened to the entity locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sync Priority
// =============================================================================

/// Drain priority of a queued change.
///
/// ## Ordering
/// Items drain strictly by weight; within one tier they drain in enqueue order.
/// ```text
/// Critical (100) ──► High (75) ──► Normal (50) ──► Low (25) ──► Background (10)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl SyncPriority {
    /// Numeric weight used to order the queue (higher drains first).
    pub const fn weight(&self) -> i64 {
        match self {
            SyncPriority::Critical => 100,
            SyncPriority::High => 75,
            SyncPriority::Normal => 50,
            SyncPriority::Low => 25,
            SyncPriority::Background => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPriority::Critical => "critical",
            SyncPriority::High => "high",
            SyncPriority::Normal => "normal",
            SyncPriority::Low => "low",
            SyncPriority::Background => "background",
        }
    }
}

impl fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Queue Status
// =============================================================================

/// Where a queued item sits in the two-phase delivery protocol.
///
/// ```text
///              claim                ack
///  Pending ──────────► InFlight ──────────► (deleted)
///     ▲                   │
///     │  retry / restart  │ attempts exhausted / terminal
///     └───────────────────┤
///                         ├──────────► Failed
///                         │ manual conflict
///                         └──────────► Conflicted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    InFlight,
    Failed,
    Conflicted,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InFlight => "in_flight",
            QueueStatus::Failed => "failed",
            QueueStatus::Conflicted => "conflicted",
        }
    }
}

// =============================================================================
// Outbox Status
// =============================================================================

/// Confirmation state of a locally originated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

// =============================================================================
// Sync Item
// =============================================================================

/// One durable, idempotent change record destined for the remote system.
///
/// The `id` is the entity id and stays stable across retries, so the remote
/// side can deduplicate repeated deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Entity id (stable across retries).
    pub id: String,

    /// Kind of entity (`product`, `transaction`, `inventory`, ...).
    pub entity_type: String,

    pub operation: SyncOperation,

    /// Entity state after the change. `Null` is allowed for deletions.
    pub payload: serde_json::Value,

    /// When the change happened on the originating device.
    pub origin_timestamp: DateTime<Utc>,

    /// Monotonic per-entity version.
    pub version: i64,

    pub origin_device_id: String,

    pub priority: SyncPriority,

    /// Delivery attempts that ended in a retryable failure.
    pub attempt_count: u32,

    /// Attempt ceiling before the item is parked as failed.
    pub max_attempts: u32,

    pub last_error: Option<String>,
}

impl SyncItem {
    /// Creates a new change record with normal priority, version 1 and
    /// the default attempt ceiling.
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        operation: SyncOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            operation,
            payload,
            origin_timestamp: Utc::now(),
            version: 1,
            origin_device_id: String::new(),
            priority: SyncPriority::default(),
            attempt_count: 0,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: SyncPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_origin_device(mut self, device_id: impl Into<String>) -> Self {
        self.origin_device_id = device_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.origin_timestamp = timestamp;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Queue key `"entity_type:id"`.
    pub fn queue_key(&self) -> String {
        queue_key(&self.entity_type, &self.id)
    }

    /// Whether another delivery attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Records a retryable failure.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_error = Some(error.into());
    }
}

/// Builds the queue key for an entity.
pub fn queue_key(entity_type: &str, id: &str) -> String {
    format!("{entity_type}:{id}")
}

/// Splits a queue key back into `(entity_type, id)`.
///
/// Entity types never contain `:`, so the first separator wins.
pub fn split_queue_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

// =============================================================================
// Sync Batch
// =============================================================================

/// Lifecycle of an in-memory batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// Per-item outcome recorded against a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Synced,
    Requeued,
    Failed,
    Conflicted,
}

/// An ephemeral group of items drained together. Never persisted: after a
/// restart the items are simply back in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    pub batch_id: Uuid,
    pub items: Vec<QueuedItem>,
    pub status: BatchStatus,
    pub processed: usize,
    pub synced: usize,
    pub requeued: usize,
    pub failed: usize,
    pub conflicted: usize,
}

/// A queued item together with the sequence number it was claimed at.
///
/// The sequence acts as a revision token: acknowledging a delivery only
/// removes the row if nothing newer has replaced it in the meantime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem {
    pub item: SyncItem,
    pub seq: i64,
}

impl SyncBatch {
    pub fn new(items: Vec<QueuedItem>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            items,
            status: BatchStatus::Pending,
            processed: 0,
            synced: 0,
            requeued: 0,
            failed: 0,
            conflicted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records the outcome of one item.
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Synced => self.synced += 1,
            ItemOutcome::Requeued => self.requeued += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Conflicted => self.conflicted += 1,
        }
    }

    /// Final status: failed only if nothing in the batch made progress.
    pub fn finish(&mut self) {
        self.status = if self.processed > 0 && self.synced == 0 && self.conflicted == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
    }
}

// =============================================================================
// Remote State & Conflicts
// =============================================================================

/// Entity state as reported by the remote system when it rejects a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    pub payload: serde_json::Value,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    /// The entity no longer exists remotely.
    #[serde(default)]
    pub deleted: bool,
}

/// Kind of divergence between local and remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides updated the entity.
    Version,
    /// One side deleted what the other updated.
    Deletion,
    /// Payload shapes are incompatible.
    Structural,
}

/// How a conflict gets settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    ClientWins,
    ServerWins,
    #[default]
    LatestWins,
    Merge,
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::ClientWins => "client_wins",
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::LatestWins => "latest_wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client_wins" => Ok(ConflictStrategy::ClientWins),
            "server_wins" => Ok(ConflictStrategy::ServerWins),
            "latest_wins" => Ok(ConflictStrategy::LatestWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "manual" => Ok(ConflictStrategy::Manual),
            _ => Err(ValidationError::NotAllowed {
                field: "conflict_strategy".to_string(),
                allowed: [
                    "client_wins",
                    "server_wins",
                    "latest_wins",
                    "merge",
                    "manual",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            }),
        }
    }
}

/// A detected divergence between the local change and the remote state.
///
/// Created when the remote rejects a push; settled either immediately by the
/// configured strategy or later by an operator. Never dropped silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: Uuid,
    pub local: SyncItem,
    pub remote: RemoteState,
    pub kind: ConflictKind,
    /// Strategy that settled the conflict, `None` while unresolved.
    pub resolution: Option<ConflictStrategy>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    pub fn new(local: SyncItem, remote: RemoteState, kind: ConflictKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            local,
            remote,
            kind,
            resolution: None,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn mark_resolved(&mut self, strategy: ConflictStrategy) {
        self.resolution = Some(strategy);
        self.resolved_at = Some(Utc::now());
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Running counters exposed by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total_synced: u64,
    pub total_failed: u64,
    pub total_conflicts: u64,
    pub batches_processed: u64,
    /// Rolling average of per-item delivery time.
    pub average_sync_time_ms: f64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_scheduled_sync: Option<DateTime<Utc>>,
}

impl SyncStatistics {
    /// Folds one successful delivery time into the running average.
    pub fn record_sync_time(&mut self, elapsed_ms: f64) {
        let n = self.total_synced.max(1) as f64;
        self.average_sync_time_ms += (elapsed_ms - self.average_sync_time_ms) / n;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
