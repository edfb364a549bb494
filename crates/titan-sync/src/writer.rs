//! # Sync Writer
//!
//! The inbound half of sync: validates local changes and appends them to the
//! durable queue. It never talks to the remote, so it keeps working while the
//! drain loop is stopped (safe mode, shutdown, not yet started).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  domain engines ──► DomainChange (mpsc) ──► SyncWriter::consume        │
//! │        │                                         │                      │
//! │        └──────► enqueue / record_transaction ◄───┘                      │
//! │                          │                                              │
//! │                          ▼                                              │
//! │            sync_queue (+ transaction_outbox)                            │
//! │                          │                                              │
//! │                          └──► trigger ──► SyncEngine drain loop         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`crate::SyncEngine`] built with [`crate::SyncEngine::with_writer`]
//! shares the writer's settings, event channel and trigger, so a supervisor
//! can replace the engine without the producers noticing.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, warn};

use titan_core::validation::validate_sync_item;
use titan_core::{
    SyncItem, SyncOperation, SyncPriority, ENTITY_INVENTORY, ENTITY_PRODUCT, ENTITY_TRANSACTION,
};
use titan_db::{Database, OutboxRepository, SyncQueueRepository};

use crate::engine::EngineConfig;
use crate::error::SyncResult;
use crate::events::{SyncEvent, EVENT_CHANNEL_CAPACITY};

// =============================================================================
// Domain Changes
// =============================================================================

/// A change published by a domain engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainChange {
    /// A product was added to the catalog. Normal priority.
    ProductCreated { id: String, payload: Value },
    /// A sale was completed at the till. High priority, recorded in the
    /// outbox as well.
    TransactionCompleted { id: String, payload: Value },
    /// Stock levels changed. Normal priority.
    InventoryUpdated { id: String, payload: Value },
}

impl DomainChange {
    /// The change record for everything but completed transactions, which
    /// go through the outbox.
    fn into_item(self) -> Result<SyncItem, (String, Value)> {
        match self {
            DomainChange::ProductCreated { id, payload } => {
                Ok(SyncItem::new(ENTITY_PRODUCT, id, SyncOperation::Create, payload))
            }
            DomainChange::InventoryUpdated { id, payload } => {
                Ok(SyncItem::new(ENTITY_INVENTORY, id, SyncOperation::Update, payload))
            }
            DomainChange::TransactionCompleted { id, payload } => Err((id, payload)),
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Appends local changes to the sync queue. Cheap to clone.
#[derive(Clone)]
pub struct SyncWriter {
    queue: SyncQueueRepository,
    outbox: OutboxRepository,
    config: Arc<RwLock<EngineConfig>>,
    events: broadcast::Sender<SyncEvent>,
    trigger: Arc<Notify>,
}

impl SyncWriter {
    pub fn new(db: &Database, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SyncWriter {
            queue: db.sync_queue(),
            outbox: db.outbox(),
            config: Arc::new(RwLock::new(config)),
            events,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Current settings.
    pub fn config(&self) -> EngineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace_config(&self, config: EngineConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<SyncEvent> {
        &self.events
    }

    pub(crate) fn trigger(&self) -> &Arc<Notify> {
        &self.trigger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Queues a change, replacing any queued change for the same entity.
    ///
    /// ## Returns
    /// The seq of the stored row.
    pub async fn enqueue(&self, item: SyncItem) -> SyncResult<i64> {
        let item = self.prepare(item)?;
        let seq = self.queue.enqueue(&item).await?;

        self.queued(&item, seq);
        Ok(seq)
    }

    /// Records a completed local transaction in the outbox and queues its
    /// change record, both in one SQL transaction.
    pub async fn record_transaction(&self, transaction_id: &str, payload: Value) -> SyncResult<i64> {
        let item = SyncItem::new(
            ENTITY_TRANSACTION,
            transaction_id,
            SyncOperation::Create,
            payload.clone(),
        )
        .with_priority(SyncPriority::High);
        let item = self.prepare(item)?;

        let (_, seq) = self
            .outbox
            .record_with_sync_item(transaction_id, &payload, &item)
            .await?;

        info!(transaction_id = %transaction_id, seq, "Transaction recorded for sync");
        self.queued(&item, seq);
        Ok(seq)
    }

    /// Turns a domain change into a queued change record.
    pub async fn apply(&self, change: DomainChange) -> SyncResult<i64> {
        match change.into_item() {
            Ok(item) => self.enqueue(item).await,
            Err((id, payload)) => self.record_transaction(&id, payload).await,
        }
    }

    /// Applies changes until every sender is dropped. A change that cannot be
    /// queued is logged and skipped; it never stops the stream.
    pub async fn consume(&self, mut changes: mpsc::Receiver<DomainChange>) {
        while let Some(change) = changes.recv().await {
            if let Err(e) = self.apply(change).await {
                warn!(error = %e, "Domain change not queued");
            }
        }
        debug!("Domain change stream closed");
    }

    fn prepare(&self, mut item: SyncItem) -> SyncResult<SyncItem> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        if item.origin_device_id.is_empty() {
            item.origin_device_id = config.device_id.clone();
        }
        item.max_attempts = config.max_attempts;
        drop(config);

        validate_sync_item(&item)?;
        Ok(item)
    }

    fn queued(&self, item: &SyncItem, seq: i64) {
        // No subscribers is fine
        let _ = self.events.send(SyncEvent::ItemQueued {
            queue_key: item.queue_key(),
            priority: item.priority,
            seq,
        });
        // An idle or offline engine ignores the nudge
        self.trigger.notify_one();
    }
}
