//! # titan-sync: Offline-First Sync Engine for Titan POS
//!
//! Every local change becomes a durable [`titan_core::SyncItem`] in the
//! terminal's SQLite queue; the [`SyncEngine`] drains that queue to a
//! [`RemoteSystem`] whenever the terminal is online, and settles version
//! conflicts with a configurable strategy.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  domain change ──► SyncWriter::enqueue / record_transaction / apply     │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  titan-db (sync_queue, outbox,                   │  │
//! │  │                  snapshots, sync_conflicts)                      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ claim_batch                             │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (drain loop)                       │  │
//! │  │                                                                  │  │
//! │  │  interval tick ─┐                                                │  │
//! │  │  enqueue ───────┼──► drain() ──► retry(push) ──► conflict rules  │  │
//! │  │  online ────────┘                                                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ RemoteSystem::push                      │
//! │              ┌────────────────┴────────────────┐                        │
//! │              ▼                                 ▼                        │
//! │  ┌───────────────────────┐         ┌───────────────────────┐           │
//! │  │ WsRemote              │         │ MemoryRemote          │           │
//! │  │ Transport (WebSocket, │         │ in-process system of  │           │
//! │  │ auto-reconnect)       │         │ record                │           │
//! │  └───────────────────────┘         └───────────────────────┘           │
//! │                                                                         │
//! │  EVENTS (broadcast): ItemQueued, BatchCompleted, ItemFailed,            │
//! │  ConflictResolved, ManualResolutionNeeded, OnlineChanged, StateChanged  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`: draining, conflict handling, settings
//! - [`writer`] - `SyncWriter`: validated appends and typed domain changes
//! - [`retry`] - Retry with exponential backoff and jitter
//! - [`remote`] - `RemoteSystem` contract and the in-process remote
//! - [`ws_remote`] - `RemoteSystem` over the hub WebSocket
//! - [`transport`] - WebSocket client with reconnection
//! - [`protocol`] - Message types for hub communication
//! - [`events`] - Typed engine events
//! - [`config`] - Sync configuration (device, hub URL, retry policy)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use titan_sync::{SyncConfig, SyncEngine, WsRemote};
//!
//! let config = SyncConfig::load_or_default(None);
//! let transport = config.transport_config().expect("hub_url configured");
//! let remote = Arc::new(WsRemote::connect(transport, config.request_timeout()));
//!
//! let engine = SyncEngine::new(database, remote.clone(), config.engine_config());
//! engine.start().await?;
//! engine.follow_connectivity(remote.connection_state());
//!
//! let status = engine.status().await?;
//! println!("Pending: {}", status.pending);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod remote;
pub mod retry;
pub mod transport;
pub mod writer;
pub mod ws_remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DeviceConfig, RetrySettings, SyncConfig, SyncSettings};
pub use engine::{DrainOutcome, DrainSummary, EngineConfig, EngineStatus, SkipReason, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{EngineState, SyncEvent};
pub use protocol::SyncMessage;
pub use remote::{MemoryRemote, RemoteAck, RemoteError, RemoteSystem};
pub use retry::{retry, retry_notify, RetryConfig, RetryOutcome};
pub use transport::{ConnectionState, TransportConfig};
pub use writer::{DomainChange, SyncWriter};
pub use ws_remote::WsRemote;
