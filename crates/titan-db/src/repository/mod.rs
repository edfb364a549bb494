//! # Repository Module
//!
//! Repository implementations for the durable queue store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  SyncEngine                                                            │
//! │       │                                                                 │
//! │       │  db.sync_queue().claim_batch(50)                               │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  SyncQueueRepository                                                   │
//! │  ├── enqueue(&self, item)                                              │
//! │  ├── claim_batch(&self, limit)                                         │
//! │  ├── acknowledge(&self, key, seq)                                      │
//! │  └── requeue(&self, item, seq)                                         │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Clean separation of concerns                                        │
//! │  • Easy to test (mock the repository)                                  │
//! │  • SQL is isolated in one place                                        │
//! │  • Can swap database implementations                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`snapshot::SnapshotRepository`] - Cached domain snapshots
//! - [`outbox::OutboxRepository`] - Locally originated transactions
//! - [`queue::SyncQueueRepository`] - Prioritized sync queue
//! - [`conflict::ConflictRepository`] - Conflict log

pub mod conflict;
pub mod outbox;
pub mod queue;
pub mod snapshot;
