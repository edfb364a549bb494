//! # Sync & Conflict Engine
//!
//! Turns every local change into a durably queued [`SyncItem`] and converges
//! it with the remote system.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           drain()                                       │
//! │                                                                         │
//! │  offline / already draining / shutting down ──► Skipped (no-op)        │
//! │                                                                         │
//! │  ┌──────────────┐   claim_batch(batch_size)   ┌──────────────────────┐ │
//! │  │ sync_queue   │ ──────────────────────────► │ SyncBatch (ordered)  │ │
//! │  │ (pending)    │   priority DESC, seq ASC     └──────────┬───────────┘ │
//! │  └──────────────┘                                         │             │
//! │         ▲                        one item at a time       ▼             │
//! │         │               ┌─────────────────────────────────────────────┐│
//! │         │               │ retry_notify(push)                          ││
//! │         │               │                                             ││
//! │         │   requeue     │  Accepted  ──► acknowledge (+ outbox ok)    ││
//! │         ├───────────────│  Conflict  ──► classify + resolve           ││
//! │         │  (back of     │  Transient ──► attempt++ → requeue / failed ││
//! │         │   its tier)   │  Terminal  ──► failed + ItemFailed event    ││
//! │         │               └─────────────────────────────────────────────┘│
//! │         │                                                               │
//! │  shutdown between items ──► release the rest (in_flight → pending)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! One drain at a time per engine, batches strictly sequential, items inside
//! a batch strictly sequential. `enqueue`, connectivity changes and the
//! interval tick only *trigger* a drain; they never preempt one.
//!
//! ## Conflict Outcomes
//! | Resolution      | Queue row                | Snapshot cache           |
//! |-----------------|--------------------------|--------------------------|
//! | AcceptRemote    | acknowledged (removed)   | remote payload / deleted |
//! | KeepLocal/Merged| requeued, version bumped | untouched                |
//! | Escalate        | parked as `conflicted`   | untouched                |
//!
//! Every conflict is written to the conflict log; automatic ones are stored
//! already resolved, escalated ones wait for [`SyncEngine::resolve_conflict_manually`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use titan_core::conflict::{self, Resolution};
use titan_core::{
    ConflictStrategy, CoreError, ItemOutcome, QueueStatus, QueuedItem, RemoteState, SyncBatch,
    SyncConflict, SyncItem, SyncStatistics, BatchStatus, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS,
    ENTITY_TRANSACTION,
};
use titan_db::{
    ConflictRepository, Database, OutboxRepository, SnapshotRepository, SyncQueueRepository,
};

use crate::error::{SyncError, SyncResult};
use crate::events::{EngineState, SyncEvent};
use crate::remote::{RemoteAck, RemoteError, RemoteSystem};
use crate::retry::{self, RetryConfig};
use crate::transport::ConnectionState;
use crate::writer::{DomainChange, SyncWriter};

// =============================================================================
// Configuration
// =============================================================================

/// Sync engine settings. Built from [`crate::SyncConfig::engine_config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stamped on items enqueued without an origin device.
    pub device_id: String,

    pub batch_size: usize,

    /// Attempt ceiling stamped on every item entering the queue.
    pub max_attempts: u32,

    pub conflict_strategy: ConflictStrategy,

    /// Interval between scheduled drains.
    pub drain_interval: Duration,

    /// Policy for a single push.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            conflict_strategy: ConflictStrategy::default(),
            drain_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Drain Results
// =============================================================================

/// Why a drain request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyDraining,
    ShuttingDown,
}

/// Totals for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub batches: u64,
    pub synced: usize,
    pub requeued: usize,
    pub failed: usize,
    pub conflicted: usize,
    /// Stopped early by shutdown or lost connectivity.
    pub interrupted: bool,
}

impl DrainSummary {
    fn absorb(&mut self, batch: &SyncBatch) {
        self.batches += 1;
        self.synced += batch.synced;
        self.requeued += batch.requeued;
        self.failed += batch.failed;
        self.conflicted += batch.conflicted;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Skipped { reason: SkipReason },
    Drained(DrainSummary),
}

impl DrainOutcome {
    pub fn summary(&self) -> Option<&DrainSummary> {
        match self {
            DrainOutcome::Drained(summary) => Some(summary),
            DrainOutcome::Skipped { .. } => None,
        }
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub online: bool,
    pub draining: bool,
    pub pending: i64,
    pub in_flight: i64,
    pub failed: i64,
    pub conflicted: i64,
    pub unresolved_conflicts: i64,
}

// =============================================================================
// Engine
// =============================================================================

/// Handle to the sync engine. Cheap to clone; every clone drives the same
/// queue and drain loop.
///
/// ## Usage
/// ```rust,ignore
/// let engine = SyncEngine::new(db.clone(), remote, config.engine_config());
/// engine.start().await?;
/// engine.follow_connectivity(ws_remote.connection_state());
///
/// engine.enqueue(SyncItem::new("product", "p-1", SyncOperation::Update, payload)).await?;
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    /// Inbound half; owns the settings, event channel and trigger.
    writer: SyncWriter,
    remote: Arc<dyn RemoteSystem>,
    queue: SyncQueueRepository,
    outbox: OutboxRepository,
    snapshots: SnapshotRepository,
    conflicts: ConflictRepository,

    online: AtomicBool,
    draining: AtomicBool,
    state: watch::Sender<EngineState>,
    stats: RwLock<SyncStatistics>,
    events: broadcast::Sender<SyncEvent>,

    /// Wakes the background loop.
    trigger: Arc<Notify>,
    /// Tells the background loop to pick up a new drain interval.
    reconfigured: Notify,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Clears the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Creates an engine over the durable store. The engine starts offline
    /// and idle; call [`SyncEngine::start`] to run the background loop.
    pub fn new(db: Database, remote: Arc<dyn RemoteSystem>, config: EngineConfig) -> Self {
        let writer = SyncWriter::new(&db, config);
        Self::with_writer(db, remote, writer)
    }

    /// Creates an engine that drains what `writer` queues. The engine takes
    /// its settings from the writer and publishes on the writer's channel.
    pub fn with_writer(db: Database, remote: Arc<dyn RemoteSystem>, writer: SyncWriter) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let events = writer.events().clone();
        let trigger = writer.trigger().clone();

        SyncEngine {
            inner: Arc::new(EngineInner {
                writer,
                remote,
                queue: db.sync_queue(),
                outbox: db.outbox(),
                snapshots: db.snapshots(),
                conflicts: db.conflicts(),
                online: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                state,
                stats: RwLock::new(SyncStatistics::default()),
                events,
                trigger,
                reconfigured: Notify::new(),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current settings.
    pub fn config(&self) -> EngineConfig {
        self.inner.writer.config()
    }

    /// The inbound half, usable even after the engine stops.
    pub fn writer(&self) -> &SyncWriter {
        &self.inner.writer
    }

    /// Replaces the settings at runtime. Takes effect from the next drain;
    /// a new drain interval restarts the schedule from now.
    pub fn update_config(&self, config: EngineConfig) {
        info!(
            batch_size = config.batch_size,
            drain_interval_secs = config.drain_interval.as_secs(),
            conflict_strategy = %config.conflict_strategy,
            "Sync settings updated"
        );
        self.inner.writer.replace_config(config);
        self.inner.reconfigured.notify_one();
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            self.emit(SyncEvent::StateChanged { state });
        }
    }

    // =========================================================================
    // Inbound: Domain Changes
    // =========================================================================

    /// Queues a change, replacing any queued change for the same entity,
    /// and wakes the drain loop.
    pub async fn enqueue(&self, item: SyncItem) -> SyncResult<i64> {
        self.inner.writer.enqueue(item).await
    }

    /// Records a completed local transaction in the outbox and queues its
    /// change record, both in one SQL transaction.
    pub async fn record_transaction(&self, transaction_id: &str, payload: Value) -> SyncResult<i64> {
        self.inner.writer.record_transaction(transaction_id, payload).await
    }

    /// Feeds domain changes into the queue until the senders drop or the
    /// engine shuts down.
    pub fn consume_changes(&self, changes: mpsc::Receiver<DomainChange>) {
        let writer = self.inner.writer.clone();
        let shutdown = self.inner.shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = writer.consume(changes) => {}
            }
        });

        self.track(handle);
    }

    fn wake(&self) {
        if self.is_online() {
            self.inner.trigger.notify_one();
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Updates connectivity. Going online wakes the drain loop.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        info!(online, "Sync connectivity changed");
        self.emit(SyncEvent::OnlineChanged { online });
        if online {
            self.inner.trigger.notify_one();
        }
    }

    /// Follows a transport's connection state until shutdown.
    pub fn follow_connectivity(&self, mut states: watch::Receiver<ConnectionState>) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let initial = states.borrow_and_update().is_online();
            engine.set_online(initial);

            loop {
                tokio::select! {
                    _ = engine.inner.shutdown.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            engine.set_online(false);
                            break;
                        }
                        let online = states.borrow_and_update().is_online();
                        engine.set_online(online);
                    }
                }
            }
        });

        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        // try_lock: only contended during shutdown, which aborts anyway
        match self.inner.tasks.try_lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(_) => handle.abort(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Recovers interrupted deliveries and starts the background drain loop.
    pub async fn start(&self) -> SyncResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }
        if self.state() != EngineState::Idle {
            debug!("Sync engine already started");
            return Ok(());
        }

        let recovered = self.inner.queue.recover_in_flight().await?;
        info!(recovered, "Sync engine starting");

        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run().await });
        self.inner.tasks.lock().await.push(handle);

        self.set_state(EngineState::Running);
        Ok(())
    }

    async fn run(&self) {
        let mut interval = self.config().drain_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.reconfigured.notified() => {
                    let updated = self.config().drain_interval;
                    if updated != interval {
                        interval = updated;
                        ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        debug!(interval_secs = interval.as_secs(), "Drain schedule restarted");
                    }
                    continue;
                }
                _ = ticker.tick() => {
                    let next = Utc::now() + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
                    self.inner.stats.write().await.next_scheduled_sync = Some(next);
                }
                _ = self.inner.trigger.notified() => {}
            }

            if let Err(e) = self.drain().await {
                error!(error = %e, "Scheduled drain failed");
            }
        }

        debug!("Drain loop stopped");
    }

    /// Stops the engine. An in-progress drain finishes its current item,
    /// returns the rest of its batch to the queue and stops.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Sync engine shutting down");
        self.inner.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Sync task ended abnormally");
                }
            }
        }

        self.set_state(EngineState::Stopped);
        info!("Sync engine stopped");
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Operator-triggered drain, outside the schedule.
    pub async fn force_sync(&self) -> SyncResult<DrainOutcome> {
        info!("Forced sync requested");
        self.drain().await
    }

    /// Ships queued items until the queue is empty or a batch needs a retry
    /// later. A no-op when offline, shutting down, or already draining.
    pub async fn drain(&self) -> SyncResult<DrainOutcome> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::ShuttingDown,
            });
        }
        if !self.is_online() {
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::Offline,
            });
        }
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress");
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::AlreadyDraining,
            });
        }
        let _guard = DrainGuard(&self.inner.draining);

        let resume = self.state();
        self.set_state(EngineState::Draining);
        let result = self.drain_batches().await;
        // Shutdown may have moved the state on meanwhile.
        if self.state() == EngineState::Draining {
            self.set_state(resume);
        }

        let summary = result?;
        if summary.batches > 0 {
            info!(
                batches = summary.batches,
                synced = summary.synced,
                requeued = summary.requeued,
                failed = summary.failed,
                conflicted = summary.conflicted,
                interrupted = summary.interrupted,
                "Drain finished"
            );
        }
        Ok(DrainOutcome::Drained(summary))
    }

    async fn drain_batches(&self) -> SyncResult<DrainSummary> {
        let batch_size = self.config().batch_size.max(1);
        let mut summary = DrainSummary::default();

        loop {
            let claimed = self.inner.queue.claim_batch(batch_size).await?;
            if claimed.is_empty() {
                break;
            }

            let full = claimed.len() == batch_size;
            let mut batch = SyncBatch::new(claimed);
            let interrupted = self.process_batch(&mut batch).await?;

            self.inner.stats.write().await.batches_processed += 1;
            summary.absorb(&batch);
            self.emit(SyncEvent::BatchCompleted {
                batch_id: batch.batch_id,
                synced: batch.synced,
                requeued: batch.requeued,
                failed: batch.failed,
                conflicted: batch.conflicted,
            });

            if interrupted {
                summary.interrupted = true;
                break;
            }
            // Requeued items wait for the next scheduled drain.
            if !full || batch.requeued > 0 {
                break;
            }
        }

        Ok(summary)
    }

    /// Processes a batch item by item.
    ///
    /// ## Returns
    /// `true` if the batch was cut short; the unprocessed items are back in
    /// the queue as `pending`.
    async fn process_batch(&self, batch: &mut SyncBatch) -> SyncResult<bool> {
        batch.status = BatchStatus::InFlight;
        debug!(batch_id = %batch.batch_id, items = batch.len(), "Processing batch");

        let items = std::mem::take(&mut batch.items);
        let mut interrupted = false;

        for (index, queued) in items.iter().enumerate() {
            if self.inner.shutdown.is_cancelled() || !self.is_online() {
                self.release(&items[index..]).await?;
                interrupted = true;
                break;
            }

            match self.process_item(queued).await {
                Ok(outcome) => batch.record(outcome),
                Err(e) => {
                    // Leave nothing stranded in_flight
                    if let Err(release_err) = self.release(&items[index..]).await {
                        error!(error = %release_err, "Failed to release claimed items");
                    }
                    batch.items = items;
                    return Err(e);
                }
            }
        }

        batch.items = items;
        batch.finish();
        Ok(interrupted)
    }

    async fn release(&self, rest: &[QueuedItem]) -> SyncResult<()> {
        let claimed: Vec<(String, i64)> = rest
            .iter()
            .map(|queued| (queued.item.queue_key(), queued.seq))
            .collect();
        let released = self.inner.queue.release(&claimed).await?;
        debug!(released, "Released unprocessed items");
        Ok(())
    }

    async fn process_item(&self, queued: &QueuedItem) -> SyncResult<ItemOutcome> {
        let QueuedItem { item, seq } = queued;
        let queue_key = item.queue_key();
        let started = Instant::now();

        let remote = &self.inner.remote;
        let policy = self.config().retry;
        let outcome = retry::retry_notify(
            &policy,
            move || async move {
                remote.push(item).await.map_err(|e| {
                    if e.is_terminal() {
                        backoff::Error::permanent(e)
                    } else {
                        backoff::Error::transient(e)
                    }
                })
            },
            |err: &RemoteError, attempt, delay| {
                debug!(
                    queue_key = %queue_key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Push failed, backing off"
                );
            },
        )
        .await;

        match outcome.result {
            Ok(RemoteAck::Accepted { remote_version }) => {
                self.on_delivered(item, *seq, remote_version, started.elapsed())
                    .await
            }
            Ok(RemoteAck::Conflict(remote)) => self.on_conflict(item, *seq, remote).await,
            Err(err) => self.on_failure(item, *seq, err, outcome.retryable).await,
        }
    }

    async fn on_delivered(
        &self,
        item: &SyncItem,
        seq: i64,
        remote_version: i64,
        elapsed: Duration,
    ) -> SyncResult<ItemOutcome> {
        let queue_key = item.queue_key();
        let removed = self.inner.queue.acknowledge(&queue_key, seq).await?;
        if !removed {
            debug!(queue_key = %queue_key, "Newer version queued meanwhile, keeping it");
        }
        if item.entity_type == ENTITY_TRANSACTION {
            self.inner.outbox.mark_confirmed(&item.id).await?;
        }

        let mut stats = self.inner.stats.write().await;
        stats.total_synced += 1;
        stats.record_sync_time(elapsed.as_secs_f64() * 1000.0);
        stats.last_sync_time = Some(Utc::now());

        debug!(queue_key = %queue_key, remote_version, "Item synced");
        Ok(ItemOutcome::Synced)
    }

    async fn on_failure(
        &self,
        item: &SyncItem,
        seq: i64,
        err: RemoteError,
        retryable: bool,
    ) -> SyncResult<ItemOutcome> {
        let mut item = item.clone();
        let message = err.to_string();
        item.record_failure(message.clone());
        let queue_key = item.queue_key();
        let is_transaction = item.entity_type == ENTITY_TRANSACTION;

        if retryable && item.can_retry() {
            self.inner.queue.requeue(&item, seq).await?;
            if is_transaction {
                self.inner.outbox.record_retry(&item.id, &message).await?;
            }
            debug!(
                queue_key = %queue_key,
                attempt = item.attempt_count,
                max_attempts = item.max_attempts,
                error = %message,
                "Item requeued"
            );
            return Ok(ItemOutcome::Requeued);
        }

        self.inner.queue.mark_failed(&item, seq).await?;
        if is_transaction {
            self.inner.outbox.mark_failed(&item.id, &message).await?;
        }
        self.inner.stats.write().await.total_failed += 1;

        warn!(
            queue_key = %queue_key,
            attempts = item.attempt_count,
            retryable,
            error = %message,
            "Item failed"
        );
        self.emit(SyncEvent::ItemFailed {
            queue_key,
            attempts: item.attempt_count,
            error: message,
        });
        Ok(ItemOutcome::Failed)
    }

    async fn on_conflict(
        &self,
        item: &SyncItem,
        seq: i64,
        remote: RemoteState,
    ) -> SyncResult<ItemOutcome> {
        let strategy = self.config().conflict_strategy;
        let kind = conflict::classify(item, &remote);
        let resolution = conflict::resolve(strategy, kind, item, &remote);
        let mut record = SyncConflict::new(item.clone(), remote, kind);
        let queue_key = item.queue_key();

        self.inner.stats.write().await.total_conflicts += 1;

        if resolution.is_escalation() {
            self.inner.queue.park_with_conflict(seq, &record).await?;

            warn!(
                conflict_id = %record.id,
                queue_key = %queue_key,
                kind = ?kind,
                %strategy,
                "Conflict needs manual resolution"
            );
            self.emit(SyncEvent::ManualResolutionNeeded {
                conflict_id: record.id,
                queue_key,
                kind,
            });
            return Ok(ItemOutcome::Conflicted);
        }

        self.apply_resolution(&resolution, item, seq, &record.remote)
            .await?;
        record.mark_resolved(strategy);
        self.inner.conflicts.insert(&record).await?;

        info!(
            conflict_id = %record.id,
            queue_key = %queue_key,
            kind = ?kind,
            %strategy,
            "Conflict resolved automatically"
        );
        self.emit(SyncEvent::ConflictResolved {
            conflict_id: record.id,
            queue_key,
            kind,
            strategy,
        });
        Ok(ItemOutcome::Conflicted)
    }

    /// Applies a settled resolution to the queue row claimed at `seq`.
    async fn apply_resolution(
        &self,
        resolution: &Resolution,
        local: &SyncItem,
        seq: i64,
        remote: &RemoteState,
    ) -> SyncResult<()> {
        match resolution {
            Resolution::AcceptRemote => {
                self.inner.queue.acknowledge(&local.queue_key(), seq).await?;
                if remote.deleted {
                    self.inner
                        .snapshots
                        .delete(&local.entity_type, &local.id)
                        .await?;
                } else {
                    self.inner
                        .snapshots
                        .put(&local.entity_type, &local.id, &remote.payload, remote.version)
                        .await?;
                }
                if local.entity_type == ENTITY_TRANSACTION {
                    self.inner
                        .outbox
                        .mark_failed(&local.id, "superseded by remote state")
                        .await?;
                }
            }
            Resolution::KeepLocal(item) | Resolution::Merged(item) => {
                self.inner.queue.requeue(item, seq).await?;
            }
            Resolution::Escalate => {}
        }
        Ok(())
    }

    // =========================================================================
    // Conflicts & Recovery
    // =========================================================================

    /// Lists conflicts waiting for an operator.
    pub async fn get_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        Ok(self.inner.conflicts.list_unresolved().await?)
    }

    /// Settles an escalated conflict with `strategy`.
    ///
    /// The parked queue row is updated only if it is still the one that
    /// conflicted; if the entity was re-enqueued meanwhile, the newer change
    /// stands and the conflict is just marked resolved.
    ///
    /// ## Errors
    /// - `manual`, or `merge` on a non-mergeable conflict
    /// - unknown or already resolved conflict
    pub async fn resolve_conflict_manually(
        &self,
        conflict_id: Uuid,
        strategy: ConflictStrategy,
    ) -> SyncResult<()> {
        let unresolvable = || CoreError::UnresolvableConflict {
            conflict_id: conflict_id.to_string(),
            strategy: strategy.to_string(),
        };

        if strategy == ConflictStrategy::Manual {
            return Err(unresolvable().into());
        }

        let record = self
            .inner
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| CoreError::ConflictNotFound(conflict_id.to_string()))?;
        if record.is_resolved() {
            return Err(CoreError::ConflictAlreadyResolved(conflict_id.to_string()).into());
        }

        let resolution = conflict::resolve(strategy, record.kind, &record.local, &record.remote);
        if resolution.is_escalation() {
            return Err(unresolvable().into());
        }

        let queue_key = record.local.queue_key();
        match self.inner.queue.get(&queue_key).await? {
            Some(entry) if entry.status == QueueStatus::Conflicted => {
                self.apply_resolution(&resolution, &record.local, entry.seq, &record.remote)
                    .await?;
            }
            _ => debug!(queue_key = %queue_key, "Parked change superseded, recording resolution only"),
        }

        if !self.inner.conflicts.mark_resolved(conflict_id, strategy).await? {
            return Err(CoreError::ConflictAlreadyResolved(conflict_id.to_string()).into());
        }

        info!(conflict_id = %conflict_id, %strategy, "Conflict resolved by operator");
        self.emit(SyncEvent::ConflictResolved {
            conflict_id,
            queue_key,
            kind: record.kind,
            strategy,
        });
        self.wake();
        Ok(())
    }

    /// Gives every failed item a fresh set of attempts.
    pub async fn retry_failed(&self) -> SyncResult<u64> {
        let count = self.inner.queue.retry_failed().await?;
        if count > 0 {
            info!(count, "Failed items returned to the queue");
            self.wake();
        }
        Ok(count)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub async fn get_statistics(&self) -> SyncStatistics {
        self.inner.stats.read().await.clone()
    }

    /// Items still heading for the remote (`pending` + `in_flight`).
    pub async fn get_pending_count(&self) -> SyncResult<i64> {
        Ok(self.inner.queue.count_active().await?)
    }

    pub async fn status(&self) -> SyncResult<EngineStatus> {
        let queue = &self.inner.queue;
        Ok(EngineStatus {
            state: self.state(),
            online: self.is_online(),
            draining: self.inner.draining.load(Ordering::SeqCst),
            pending: queue.count_by_status(QueueStatus::Pending).await?,
            in_flight: queue.count_by_status(QueueStatus::InFlight).await?,
            failed: queue.count_by_status(QueueStatus::Failed).await?,
            conflicted: queue.count_by_status(QueueStatus::Conflicted).await?,
            unresolved_conflicts: self.inner.conflicts.count_unresolved().await?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use titan_core::{OutboxStatus, SyncOperation, SyncPriority, ENTITY_PRODUCT};
    use titan_db::DbConfig;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            device_id: "terminal-test".into(),
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn engine_with(
        remote: Arc<dyn RemoteSystem>,
        config: EngineConfig,
    ) -> (SyncEngine, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = SyncEngine::new(db.clone(), remote, config);
        engine.set_online(true);
        (engine, db)
    }

    fn product(id: &str, payload: Value) -> SyncItem {
        SyncItem::new(ENTITY_PRODUCT, id, SyncOperation::Update, payload)
    }

    fn drained(outcome: DrainOutcome) -> DrainSummary {
        match outcome {
            DrainOutcome::Drained(summary) => summary,
            other => panic!("expected a drain, got {other:?}"),
        }
    }

    /// Remote whose pushes block until the test opens the gate.
    struct GatedRemote {
        entered: Notify,
        gate: Notify,
        inner: MemoryRemote,
    }

    #[async_trait]
    impl RemoteSystem for GatedRemote {
        async fn push(&self, item: &SyncItem) -> Result<RemoteAck, RemoteError> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.push(item).await
        }
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_per_entity() {
        let (engine, _db) = engine_with(Arc::new(MemoryRemote::new()), quick_config()).await;

        engine.enqueue(product("p1", json!({"price": 1}))).await.unwrap();
        engine
            .enqueue(product("p1", json!({"price": 2})).with_version(2))
            .await
            .unwrap();

        assert_eq!(engine.get_pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_items() {
        let (engine, _db) = engine_with(Arc::new(MemoryRemote::new()), quick_config()).await;
        let err = engine.enqueue(product("", json!({}))).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidItem(_)));
    }

    #[tokio::test]
    async fn test_drain_is_noop_offline_and_on_empty_queue() {
        let (engine, _db) = engine_with(Arc::new(MemoryRemote::new()), quick_config()).await;

        assert_eq!(drained(engine.drain().await.unwrap()), DrainSummary::default());

        engine.set_online(false);
        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Skipped {
                reason: SkipReason::Offline
            }
        );
    }

    #[tokio::test]
    async fn test_drain_ships_critical_before_normal() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _db) = engine_with(remote.clone(), quick_config()).await;

        engine.enqueue(product("n1", json!({}))).await.unwrap();
        engine
            .enqueue(product("b1", json!({})).with_priority(SyncPriority::Background))
            .await
            .unwrap();
        engine
            .enqueue(product("c1", json!({})).with_priority(SyncPriority::Critical))
            .await
            .unwrap();
        engine.enqueue(product("n2", json!({}))).await.unwrap();

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.synced, 4);

        let order: Vec<String> = remote.delivered().await.into_iter().map(|i| i.id).collect();
        assert_eq!(order, vec!["c1", "n1", "n2", "b1"]);
        assert_eq!(engine.get_pending_count().await.unwrap(), 0);

        let stats = engine.get_statistics().await;
        assert_eq!(stats.total_synced, 4);
        assert_eq!(stats.batches_processed, 1);
        assert!(stats.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_small_batches_drain_whole_queue() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            batch_size: 2,
            ..quick_config()
        };
        let (engine, _db) = engine_with(remote.clone(), config).await;

        for id in ["a", "b", "c", "d", "e"] {
            engine.enqueue(product(id, json!({}))).await.unwrap();
        }

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.synced, 5);
    }

    #[tokio::test]
    async fn test_second_drain_while_draining_is_skipped() {
        let remote = Arc::new(GatedRemote {
            entered: Notify::new(),
            gate: Notify::new(),
            inner: MemoryRemote::new(),
        });
        let (engine, _db) = engine_with(remote.clone(), quick_config()).await;
        engine.enqueue(product("p1", json!({}))).await.unwrap();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.drain().await }
        });
        remote.entered.notified().await;

        assert_eq!(
            engine.drain().await.unwrap(),
            DrainOutcome::Skipped {
                reason: SkipReason::AlreadyDraining
            }
        );

        remote.gate.notify_one();
        let summary = drained(first.await.unwrap().unwrap());
        assert_eq!(summary.synced, 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_then_fails() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            max_attempts: 2,
            ..quick_config()
        };
        let (engine, db) = engine_with(remote.clone(), config).await;
        let mut events = engine.subscribe();

        engine.enqueue(product("p1", json!({}))).await.unwrap();

        remote.fail_next(RemoteError::Unavailable("503 from hub".into())).await;
        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.requeued, 1);

        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.item.attempt_count, 1);

        remote.fail_next(RemoteError::Timeout(500)).await;
        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.failed, 1);

        // Never dropped: parked as failed with its last error.
        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert_eq!(entry.item.attempt_count, 2);
        assert!(entry.item.last_error.unwrap().contains("timed out"));
        assert_eq!(engine.get_statistics().await.total_failed, 1);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ItemFailed { queue_key, attempts, .. } = event {
                assert_eq!(queue_key, "product:p1");
                assert_eq!(attempts, 2);
                saw_failure = true;
            }
        }
        assert!(saw_failure);

        // An operator can give it another chance.
        assert_eq!(engine.retry_failed().await.unwrap(), 1);
        assert_eq!(drained(engine.drain().await.unwrap()).synced, 1);
    }

    #[tokio::test]
    async fn test_terminal_rejection_fails_immediately() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, db) = engine_with(remote.clone(), quick_config()).await;

        engine.enqueue(product("p1", json!({}))).await.unwrap();
        remote.fail_next(RemoteError::Rejected("unknown entity".into())).await;

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.failed, 1);
        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert_eq!(entry.item.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_inline_retry_recovers_transient_error() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..Default::default()
            },
            ..quick_config()
        };
        let (engine, _db) = engine_with(remote.clone(), config).await;

        engine.enqueue(product("p1", json!({}))).await.unwrap();
        remote.fail_next(RemoteError::Unavailable("connection reset".into())).await;

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.requeued, 0);
    }

    #[tokio::test]
    async fn test_latest_wins_accepts_newer_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, db) = engine_with(remote.clone(), quick_config()).await;

        let t1 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t2 = t1 + chrono::Duration::seconds(30);
        remote
            .seed(
                "product:p1",
                RemoteState {
                    payload: json!({"price": 300}),
                    version: 5,
                    timestamp: t2,
                    deleted: false,
                },
            )
            .await;

        engine
            .enqueue(
                product("p1", json!({"price": 250}))
                    .with_version(5)
                    .with_timestamp(t1),
            )
            .await
            .unwrap();

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.conflicted, 1);
        assert_eq!(engine.get_pending_count().await.unwrap(), 0);

        let cached = db.snapshots().get(ENTITY_PRODUCT, "p1").await.unwrap().unwrap();
        assert_eq!(cached.payload, json!({"price": 300}));
        assert_eq!(cached.version, 5);

        // Logged, but nothing left for an operator.
        assert!(engine.get_conflicts().await.unwrap().is_empty());
        let logged = db.conflicts().list_recent(10).await.unwrap();
        assert_eq!(logged[0].resolution, Some(ConflictStrategy::LatestWins));
        assert_eq!(engine.get_statistics().await.total_conflicts, 1);
    }

    #[tokio::test]
    async fn test_client_wins_overwrites_remote_on_next_drain() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::ClientWins,
            ..quick_config()
        };
        let (engine, _db) = engine_with(remote.clone(), config).await;

        remote
            .seed(
                "product:p1",
                RemoteState {
                    payload: json!({"price": 300}),
                    version: 7,
                    timestamp: Utc::now(),
                    deleted: false,
                },
            )
            .await;
        engine.enqueue(product("p1", json!({"price": 250}))).await.unwrap();

        drained(engine.drain().await.unwrap());
        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.synced, 1);

        let stored = remote.get("product:p1").await.unwrap();
        assert_eq!(stored.payload, json!({"price": 250}));
        assert_eq!(stored.version, 8);
    }

    #[tokio::test]
    async fn test_manual_conflict_parks_item_without_blocking_others() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::Manual,
            ..quick_config()
        };
        let (engine, db) = engine_with(remote.clone(), config).await;
        let mut events = engine.subscribe();

        remote
            .seed(
                "product:p1",
                RemoteState {
                    payload: json!({"price": 300}),
                    version: 3,
                    timestamp: Utc::now(),
                    deleted: false,
                },
            )
            .await;
        engine.enqueue(product("p1", json!({"price": 250}))).await.unwrap();
        engine.enqueue(product("p2", json!({"price": 10}))).await.unwrap();

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.conflicted, 1);
        assert_eq!(summary.synced, 1);

        let conflicts = engine.get_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Conflicted);

        let mut escalated = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ManualResolutionNeeded { conflict_id, .. } = &event {
                assert_eq!(*conflict_id, conflicts[0].id);
                assert!(event.is_high_priority());
                escalated = true;
            }
        }
        assert!(escalated);

        // Manual is not an answer.
        assert!(engine
            .resolve_conflict_manually(conflicts[0].id, ConflictStrategy::Manual)
            .await
            .is_err());

        engine
            .resolve_conflict_manually(conflicts[0].id, ConflictStrategy::ServerWins)
            .await
            .unwrap();

        assert!(db.sync_queue().get("product:p1").await.unwrap().is_none());
        let cached = db.snapshots().get(ENTITY_PRODUCT, "p1").await.unwrap().unwrap();
        assert_eq!(cached.payload, json!({"price": 300}));
        assert!(engine.get_conflicts().await.unwrap().is_empty());

        let again = engine
            .resolve_conflict_manually(conflicts[0].id, ConflictStrategy::ClientWins)
            .await;
        assert!(matches!(
            again,
            Err(SyncError::Core(CoreError::ConflictAlreadyResolved(_)))
        ));
    }

    #[tokio::test]
    async fn test_escalation_survives_conflict_log_failure() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::Manual,
            ..quick_config()
        };
        let (engine, db) = engine_with(remote.clone(), config).await;
        remote
            .seed(
                "product:p1",
                RemoteState {
                    payload: json!({"price": 300}),
                    version: 3,
                    timestamp: Utc::now(),
                    deleted: false,
                },
            )
            .await;
        engine.enqueue(product("p1", json!({"price": 250}))).await.unwrap();

        sqlx::query("ALTER TABLE sync_conflicts RENAME TO sync_conflicts_offline")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(engine.drain().await.is_err());
        sqlx::query("ALTER TABLE sync_conflicts_offline RENAME TO sync_conflicts")
            .execute(db.pool())
            .await
            .unwrap();

        // Still queued, so the next drain escalates it properly.
        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(engine.get_pending_count().await.unwrap(), 1);

        let summary = drained(engine.drain().await.unwrap());
        assert_eq!(summary.conflicted, 1);
        assert_eq!(engine.get_conflicts().await.unwrap().len(), 1);
        let entry = db.sync_queue().get("product:p1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Conflicted);
    }

    #[tokio::test]
    async fn test_merge_on_deletion_escalates() {
        let remote = Arc::new(MemoryRemote::new());
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::Merge,
            ..quick_config()
        };
        let (engine, _db) = engine_with(remote.clone(), config).await;

        remote
            .seed(
                "product:p1",
                RemoteState {
                    payload: Value::Null,
                    version: 4,
                    timestamp: Utc::now(),
                    deleted: true,
                },
            )
            .await;
        engine.enqueue(product("p1", json!({"price": 1}))).await.unwrap();

        drained(engine.drain().await.unwrap());
        let open = engine.get_conflicts().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, titan_core::ConflictKind::Deletion);

        let merge_again = engine
            .resolve_conflict_manually(open[0].id, ConflictStrategy::Merge)
            .await;
        assert!(matches!(
            merge_again,
            Err(SyncError::Core(CoreError::UnresolvableConflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_transaction_outbox_is_confirmed() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, db) = engine_with(remote.clone(), quick_config()).await;

        engine
            .record_transaction("t-1001", json!({"total": 1099}))
            .await
            .unwrap();
        assert_eq!(
            db.outbox().count_by_status(OutboxStatus::Pending).await.unwrap(),
            1
        );

        drained(engine.drain().await.unwrap());

        let entry = db.outbox().get("t-1001").await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Confirmed);
        let delivered = remote.delivered().await;
        assert_eq!(delivered[0].priority, SyncPriority::High);
        assert_eq!(delivered[0].origin_device_id, "terminal-test");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_between_items() {
        let remote = Arc::new(GatedRemote {
            entered: Notify::new(),
            gate: Notify::new(),
            inner: MemoryRemote::new(),
        });
        let (engine, db) = engine_with(remote.clone(), quick_config()).await;

        for id in ["a", "b", "c"] {
            engine.enqueue(product(id, json!({}))).await.unwrap();
        }

        let drain = tokio::spawn({
            let engine = engine.clone();
            async move { engine.drain().await }
        });
        remote.entered.notified().await;

        engine.shutdown().await;
        remote.gate.notify_one();

        let summary = drained(drain.await.unwrap().unwrap());
        assert!(summary.interrupted);
        assert_eq!(summary.synced, 1);

        // The rest went back to pending, nothing left in flight.
        let queue = db.sync_queue();
        assert_eq!(queue.count_by_status(QueueStatus::Pending).await.unwrap(), 2);
        assert_eq!(queue.count_by_status(QueueStatus::InFlight).await.unwrap(), 0);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_unacknowledged_items_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal.db");

        {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            let engine = SyncEngine::new(db.clone(), Arc::new(MemoryRemote::new()), quick_config());
            for id in ["a", "b", "c"] {
                engine.enqueue(product(id, json!({}))).await.unwrap();
            }
            // Crash while a batch is in flight.
            let claimed = db.sync_queue().claim_batch(2).await.unwrap();
            assert_eq!(claimed.len(), 2);
            db.close().await;
        }

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let engine = SyncEngine::new(db.clone(), Arc::new(MemoryRemote::new()), quick_config());
        engine.start().await.unwrap();

        let queue = db.sync_queue();
        assert_eq!(queue.count_by_status(QueueStatus::Pending).await.unwrap(), 3);
        assert_eq!(engine.get_pending_count().await.unwrap(), 3);

        engine.shutdown().await;
        db.close().await;
    }

    #[tokio::test]
    async fn test_background_loop_drains_after_going_online() {
        let remote = Arc::new(MemoryRemote::new());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = SyncEngine::new(db.clone(), remote.clone(), quick_config());

        engine.enqueue(product("p1", json!({}))).await.unwrap();
        engine.start().await.unwrap();

        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        engine.follow_connectivity(rx);
        let mut events = engine.subscribe();
        tx.send_replace(ConnectionState::Connected);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SyncEvent::BatchCompleted { synced: 1, .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(remote.delivered().await.len(), 1);
        assert!(engine.is_online());

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_config_restarts_schedule() {
        let remote = Arc::new(MemoryRemote::new());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = EngineConfig {
            drain_interval: Duration::from_secs(3600),
            ..quick_config()
        };
        let engine = SyncEngine::new(db.clone(), remote.clone(), config);
        engine.start().await.unwrap();
        engine.set_online(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Written behind the engine's back: only the schedule picks it up.
        let mut item = product("p1", json!({"price": 5}));
        item.origin_device_id = "terminal-test".into();
        db.sync_queue().enqueue(&item).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(remote.delivered().await.is_empty());

        engine.update_config(EngineConfig {
            drain_interval: Duration::from_millis(50),
            batch_size: 10,
            ..engine.config()
        });
        assert_eq!(engine.config().batch_size, 10);

        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.delivered().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_domain_changes_flow_until_shutdown() {
        let (engine, db) = engine_with(Arc::new(MemoryRemote::new()), quick_config()).await;
        let (tx, rx) = mpsc::channel(8);
        engine.consume_changes(rx);

        tx.send(DomainChange::TransactionCompleted {
            id: "tx-9".into(),
            payload: json!({"total_cents": 900}),
        })
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.get_pending_count().await.unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(db.outbox().get("tx-9").await.unwrap().is_some());

        engine.shutdown().await;
        let late = DomainChange::ProductCreated {
            id: "p-2".into(),
            payload: json!({}),
        };
        assert!(tx.send(late).await.is_err());

        // Queueing still works with the drain side stopped.
        engine
            .writer()
            .enqueue(product("p-3", json!({"price": 1})))
            .await
            .unwrap();
        assert_eq!(engine.get_pending_count().await.unwrap(), 2);
    }
}
