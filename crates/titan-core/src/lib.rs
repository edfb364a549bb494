//! # titan-core: Sync Domain Model for the Titan POS Terminal
//!
//! This crate holds the types and rules of the offline-first sync layer as
//! pure code with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Titan POS Terminal Runtime                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 titan-kernel (Supervisor)                       │   │
//! │  │       boot phases, health checks, incidents, safe mode          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 titan-sync (Sync & Conflict Engine)             │   │
//! │  │         enqueue, drain, retry/backoff, conflict handling         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ titan-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │ conflict  │  │ validation│                  │   │
//! │  │   │ SyncItem  │  │ classify  │  │   rules   │                  │   │
//! │  │   │ SyncBatch │  │ resolve   │  │  checks   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                titan-db (Durable Queue Store)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Change records, priorities, batches, conflicts
//! - [`conflict`] - Conflict classification and resolution strategies
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use serde_json::json;
//! use titan_core::{SyncItem, SyncOperation, SyncPriority};
//!
//! let item = SyncItem::new("transaction", "t-1001", SyncOperation::Create, json!({"total": 1099}))
//!     .with_priority(SyncPriority::High);
//!
//! assert_eq!(item.queue_key(), "transaction:t-1001");
//! assert_eq!(item.priority.weight(), 75);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::Resolution;
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default delivery attempt ceiling for a new change record.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Upper bound accepted for any attempt ceiling.
///
/// Keeps a misconfigured item from hammering the remote indefinitely.
pub const MAX_ATTEMPTS_CEILING: u32 = 100;

/// Default number of items drained per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;
