//! Stock components for a headless terminal.
//!
//! Each one wraps a subsystem from the lower crates so the kernel can start,
//! poll and stop it. Pricing, tax, compliance and presentation belong to the
//! host application and are registered by it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use titan_core::ENTITY_PRODUCT;
use titan_db::{Database, SnapshotRepository};
use titan_sync::{
    ConnectionState, EngineConfig, EngineState, RemoteSystem, SyncEngine, SyncEvent, SyncWriter,
};

use crate::component::{Component, ComponentContext, ComponentKind, IncidentReporter};
use crate::error::ComponentError;
use crate::health::{HealthStatus, Severity};

// =============================================================================
// Hardware
// =============================================================================

/// Hardware layer for terminals without attached peripherals.
#[derive(Debug, Default)]
pub struct HeadlessHardware;

#[async_trait]
impl Component for HeadlessHardware {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Hardware
    }

    async fn initialize(&self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        info!("No peripherals attached, running headless");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn status(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Durable Store
// =============================================================================

/// The local database. The kernel only checks it; the owner closes it.
pub struct StoreComponent {
    db: Database,
}

impl StoreComponent {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Component for StoreComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::DurableStore
    }

    async fn initialize(&self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        if !self.db.health_check().await {
            return Err(ComponentError::Unavailable("database not reachable".into()));
        }

        let active = self.db.sync_queue().count_active().await.map_err(|e| {
            if e.is_transient() {
                ComponentError::Unavailable(e.to_string())
            } else {
                ComponentError::InitFailed(e.to_string())
            }
        })?;
        info!(queued_items = active, "Durable store ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        debug!("Durable store released");
        Ok(())
    }

    /// A busy store is degraded; a store that cannot answer at all has failed.
    async fn status(&self) -> HealthStatus {
        match self.db.sync_queue().count_active().await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Durable store busy");
                HealthStatus::Degraded
            }
            Err(e) => {
                warn!(error = %e, "Durable store check failed");
                HealthStatus::Failed
            }
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Read side of the product catalog: the snapshot cache kept current by sync.
pub struct CatalogComponent {
    snapshots: SnapshotRepository,
}

impl CatalogComponent {
    pub fn new(db: &Database) -> Self {
        Self {
            snapshots: db.snapshots(),
        }
    }
}

#[async_trait]
impl Component for CatalogComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Catalog
    }

    async fn initialize(&self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        let products = self
            .snapshots
            .count(ENTITY_PRODUCT)
            .await
            .map_err(|e| ComponentError::InitFailed(e.to_string()))?;

        if products == 0 {
            info!("Catalog empty, waiting for first sync");
        } else {
            info!(products, "Catalog loaded");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn status(&self) -> HealthStatus {
        match self.snapshots.count(ENTITY_PRODUCT).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Catalog unreadable");
                HealthStatus::Failed
            }
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Where the sync engine takes its online flag from.
#[derive(Debug, Clone)]
pub enum Connectivity {
    /// In-process remote, always reachable.
    AlwaysOnline,
    /// Follow a transport's connection state.
    Follow(watch::Receiver<ConnectionState>),
}

/// Runs a [`SyncEngine`] under the kernel.
///
/// A stopped engine cannot be started again, so every `initialize` builds a
/// fresh one over the same store, remote and [`SyncWriter`]. The writer
/// outlives the engines: domain code keeps queueing through it while sync is
/// stopped, and the next engine drains what piled up. Terminal failures and
/// conflicts that need an operator are raised as kernel incidents.
pub struct SyncEngineComponent {
    db: Database,
    remote: Arc<dyn RemoteSystem>,
    writer: SyncWriter,
    connectivity: Connectivity,
    running: Mutex<Option<RunningEngine>>,
}

struct RunningEngine {
    engine: SyncEngine,
    forwarder: JoinHandle<()>,
}

impl SyncEngineComponent {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteSystem>,
        config: EngineConfig,
        connectivity: Connectivity,
    ) -> Self {
        let writer = SyncWriter::new(&db, config);
        Self {
            db,
            remote,
            writer,
            connectivity,
            running: Mutex::new(None),
        }
    }

    /// Where domain engines queue their changes. Available in every kernel
    /// state, safe mode included.
    pub fn writer(&self) -> SyncWriter {
        self.writer.clone()
    }

    /// The live engine, if the component is running.
    pub async fn engine(&self) -> Option<SyncEngine> {
        self.running.lock().await.as_ref().map(|r| r.engine.clone())
    }
}

#[async_trait]
impl Component for SyncEngineComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Sync
    }

    async fn initialize(&self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let engine =
            SyncEngine::with_writer(self.db.clone(), self.remote.clone(), self.writer.clone());
        engine
            .start()
            .await
            .map_err(|e| ComponentError::InitFailed(e.to_string()))?;

        match &self.connectivity {
            Connectivity::AlwaysOnline => engine.set_online(true),
            Connectivity::Follow(states) => engine.follow_connectivity(states.clone()),
        }

        let forwarder = tokio::spawn(forward_incidents(engine.subscribe(), ctx.incidents.clone()));
        *running = Some(RunningEngine { engine, forwarder });

        info!(device_id = %self.writer.config().device_id, "Sync engine started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.engine.shutdown().await;
        running.forwarder.abort();
        Ok(())
    }

    async fn status(&self) -> HealthStatus {
        let Some(engine) = self.engine().await else {
            return HealthStatus::Failed;
        };

        match engine.status().await {
            Ok(status) if status.state == EngineState::Stopped => HealthStatus::Failed,
            Ok(status) if !status.online || status.failed > 0 || status.unresolved_conflicts > 0 => {
                HealthStatus::Degraded
            }
            Ok(_) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Sync status unavailable");
                HealthStatus::Critical
            }
        }
    }
}

/// Turns sync events that need attention into incidents.
async fn forward_incidents(mut events: broadcast::Receiver<SyncEvent>, incidents: IncidentReporter) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::ItemFailed {
                queue_key,
                attempts,
                error,
            }) => incidents.report(
                Severity::High,
                format!("{queue_key} failed after {attempts} attempts: {error}"),
            ),
            Ok(SyncEvent::ManualResolutionNeeded {
                conflict_id,
                queue_key,
                kind,
            }) => incidents.report(
                Severity::High,
                format!("{kind:?} conflict on {queue_key} needs manual resolution ({conflict_id})"),
            ),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Sync event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
