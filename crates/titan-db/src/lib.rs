//! # titan-db: Durable Queue Store for the Titan POS Terminal
//!
//! Crash-safe local persistence for the sync layer: cached snapshots, the
//! transaction outbox, the prioritized sync queue and the conflict log.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Titan POS Data Flow                              │
//! │                                                                         │
//! │  SyncEngine / domain engines                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     titan-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │  (queue.rs)   │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │    │ SnapshotRepo  │    │ 001_durable_ │  │   │
//! │  │   │ Connection    │◄───│ OutboxRepo    │    │   queue.sql  │  │   │
//! │  │   │ Management    │    │ SyncQueueRepo │    │ ...          │  │   │
//! │  │   │               │    │ ConflictRepo  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/com.titan.pos/terminal.db (WAL, synchronous=FULL)  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (snapshot, outbox, queue, conflict)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use titan_db::{Database, DbConfig};
//!
//! // Create database with default config
//! let config = DbConfig::new("path/to/db.sqlite");
//! let db = Database::new(config).await?;
//!
//! // Run migrations
//! db.run_migrations().await?;
//!
//! // Use repositories
//! let seq = db.sync_queue().enqueue(&item).await?;
//! let batch = db.sync_queue().claim_batch(50).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::conflict::ConflictRepository;
pub use repository::outbox::{OutboxEntry, OutboxRepository};
pub use repository::queue::{QueueEntry, QueueIndex, SyncQueueRepository};
pub use repository::snapshot::{Snapshot, SnapshotRepository};
