//! # Kernel Supervisor
//!
//! Owns the boot sequence, the component registry, the health record and the
//! recovery policy. Constructed once at process start and passed around as a
//! cheap [`Kernel`] handle.
//!
//! ## Boot & Recovery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  boot()  (only from UNINITIALIZED)                                      │
//! │                                                                         │
//! │  ┌─────────────────── timeout(max_boot_time) ───────────────────────┐   │
//! │  │ load_config → initialize_hardware → register_drivers →          │   │
//! │  │ start_event_bus → start_core_engines → mount_presentation       │   │
//! │  │   each phase: progress = (i+1)/6, OnBoot hooks                  │   │
//! │  └──────────────────────────────┬───────────────────────────────────┘   │
//! │                 ok              │             failed / timed out        │
//! │        ┌────────────────────────┴──────────────────────┐                │
//! │        ▼                                               ▼                │
//! │  READY → OnReady → monitor → RUNNING            ERROR → OnError         │
//! │                                                        │                │
//! │                  auto_recovery && attempts < max ──────┤                │
//! │                  stop started components,              │                │
//! │                  UNINITIALIZED, boot again ◄───────────┤                │
//! │                                                        │ exhausted      │
//! │                  safe_mode_enabled ────► SAFE_MODE (stop non-critical)  │
//! │                  otherwise         ────► Err(BootFailed)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Health Monitoring
//! A single task polls every running component on a fixed interval. A poll
//! that exceeds the latency threshold marks the component degraded and logs
//! an incident; the component keeps running. A tick that arrives while the
//! previous check is still running is skipped. Nothing here restarts a
//! component; that is an operator decision ([`Kernel::force_restart`]).

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::component::{Component, ComponentContext, ComponentKind, IncidentReport, IncidentReporter};
use crate::config::KernelConfig;
use crate::error::{ComponentError, KernelError, KernelResult};
use crate::events::{HookPoint, KernelEvent, LifecycleEvent, LifecycleHook, KERNEL_EVENT_CAPACITY};
use crate::health::{HealthStatus, Incident, KernelHealth, Severity};
use crate::types::{BootContext, BootOutcome, BootPhase, KernelState, KernelStatus};

/// Health key of the kernel's own event bus.
pub const EVENT_BUS: &str = "event_bus";

/// Health detail of a component the kernel shut down.
const STOPPED: &str = "stopped";

const INCIDENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to the kernel supervisor. Clones share one kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    config: KernelConfig,
    /// Keyed by kind, so iteration order is start order.
    components: RwLock<BTreeMap<ComponentKind, Arc<dyn Component>>>,
    /// Components initialized and not yet shut down.
    active: Mutex<BTreeSet<ComponentKind>>,

    state: watch::Sender<KernelState>,
    health: Arc<RwLock<KernelHealth>>,
    boot: RwLock<Option<BootContext>>,
    recovery_attempts: AtomicU32,
    boot_requested: AtomicBool,

    hooks: std::sync::RwLock<Vec<(HookPoint, LifecycleHook)>>,
    events: broadcast::Sender<KernelEvent>,
    incident_tx: mpsc::Sender<IncidentReport>,
    incident_rx: Mutex<Option<mpsc::Receiver<IncidentReport>>>,

    monitor: Mutex<Option<Monitor>>,
    check_lock: Mutex<()>,
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let (state, _) = watch::channel(KernelState::Uninitialized);
        let (events, _) = broadcast::channel(KERNEL_EVENT_CAPACITY);
        let (incident_tx, incident_rx) = mpsc::channel(INCIDENT_CHANNEL_CAPACITY);
        let health = KernelHealth::new(config.max_incidents);

        Kernel {
            inner: Arc::new(KernelInner {
                config,
                components: RwLock::new(BTreeMap::new()),
                active: Mutex::new(BTreeSet::new()),
                state,
                health: Arc::new(RwLock::new(health)),
                boot: RwLock::new(None),
                recovery_attempts: AtomicU32::new(0),
                boot_requested: AtomicBool::new(false),
                hooks: std::sync::RwLock::new(Vec::new()),
                events,
                incident_tx,
                incident_rx: Mutex::new(Some(incident_rx)),
                monitor: Mutex::new(None),
                check_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> KernelState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<KernelState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.events.subscribe()
    }

    /// Recovery attempts made so far. Persists across boots.
    pub fn recovery_attempts(&self) -> u32 {
        self.inner.recovery_attempts.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: KernelState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Kernel state changed");
        }
    }

    fn emit(&self, event: KernelEvent) {
        let _ = self.inner.events.send(event);
    }

    // =========================================================================
    // Registration & Hooks
    // =========================================================================

    /// Adds a component. Only allowed before the first boot.
    pub async fn register(&self, component: Arc<dyn Component>) -> KernelResult<()> {
        if self.inner.boot_requested.load(Ordering::SeqCst) {
            return Err(KernelError::RegistrationClosed);
        }

        let kind = component.kind();
        let mut components = self.inner.components.write().await;
        if components.contains_key(&kind) {
            return Err(KernelError::DuplicateComponent(kind));
        }
        components.insert(kind, component);

        debug!(component = %kind, "Component registered");
        Ok(())
    }

    pub fn add_lifecycle_hook<F>(&self, point: HookPoint, hook: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let hook: LifecycleHook = Arc::new(hook);
        self.inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((point, hook));
    }

    /// Runs the hooks for `event`. A panicking hook is logged and skipped.
    fn fire(&self, event: &LifecycleEvent) {
        let point = event.hook_point();
        let hooks: Vec<LifecycleHook> = self
            .inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(p, _)| *p == point)
            .map(|(_, hook)| hook.clone())
            .collect();

        for hook in hooks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| (*hook)(event))).is_err() {
                error!(hook = ?point, "Lifecycle hook panicked");
            }
        }
    }

    // =========================================================================
    // Boot
    // =========================================================================

    /// Runs the boot sequence, recovering and falling back to safe mode per
    /// configuration.
    ///
    /// ## Errors
    /// - `AlreadyBooted` outside `UNINITIALIZED`
    /// - `BootFailed` once recovery is exhausted with safe mode disabled
    pub async fn boot(&self) -> KernelResult<BootOutcome> {
        let current = self.state();
        if current != KernelState::Uninitialized {
            return Err(KernelError::AlreadyBooted(current));
        }
        self.inner.boot_requested.store(true, Ordering::SeqCst);

        let config = &self.inner.config;
        loop {
            self.set_state(KernelState::Initializing);
            *self.inner.boot.write().await = Some(BootContext::new());
            let started = Instant::now();
            info!(version = %config.version, environment = ?config.environment, "Booting kernel");

            let result =
                match tokio::time::timeout(config.max_boot_time(), self.run_boot_sequence()).await {
                    Ok(result) => result,
                    Err(_) => Err(KernelError::BootTimeout(config.max_boot_time_ms)),
                };

            let err = match result {
                Ok(()) => {
                    self.finish_boot(started.elapsed()).await;
                    return Ok(BootOutcome::Ready);
                }
                Err(err) => err,
            };

            let message = err.to_string();
            self.set_state(KernelState::Error);
            self.update_boot(|ctx| ctx.fail(message.clone())).await;
            error!(error = %message, "Kernel boot failed");
            self.log_incident(Severity::Critical, "kernel", format!("Boot failed: {message}"))
                .await;
            self.fire(&LifecycleEvent::Error {
                message: message.clone(),
            });

            let attempts = self.recovery_attempts();
            if config.auto_recovery_enabled && attempts < config.max_recovery_attempts {
                let attempt = self.inner.recovery_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(attempt, max = config.max_recovery_attempts, "Attempting kernel recovery");
                self.stop_components().await;
                self.set_state(KernelState::Uninitialized);
                continue;
            }

            self.emit(KernelEvent::BootFailed {
                error: message.clone(),
                recovery_attempts: attempts,
                safe_mode: config.safe_mode_enabled,
            });

            if config.safe_mode_enabled {
                self.enter_safe_mode().await;
                return Ok(BootOutcome::SafeMode);
            }

            self.stop_components().await;
            return Err(KernelError::BootFailed {
                attempts,
                reason: message,
            });
        }
    }

    async fn run_boot_sequence(&self) -> KernelResult<()> {
        self.set_state(KernelState::Booting);

        for phase in BootPhase::SEQUENCE {
            self.update_boot(|ctx| ctx.enter(phase)).await;
            debug!(%phase, "Entering boot phase");

            self.run_phase(phase).await?;

            let progress = self
                .update_boot(|ctx| {
                    ctx.complete(phase);
                    ctx.progress
                })
                .await;
            self.fire(&LifecycleEvent::Boot { phase, progress });
        }

        self.update_boot(|ctx| ctx.complete(BootPhase::Complete)).await;
        Ok(())
    }

    async fn run_phase(&self, phase: BootPhase) -> KernelResult<()> {
        match phase {
            BootPhase::LoadConfig => self.inner.config.validate(),
            BootPhase::StartEventBus => {
                self.start_event_bus().await;
                Ok(())
            }
            BootPhase::Complete => Ok(()),
            _ => self.start_components(phase).await,
        }
    }

    async fn update_boot<R>(&self, f: impl FnOnce(&mut BootContext) -> R) -> R {
        let mut boot = self.inner.boot.write().await;
        f(boot.get_or_insert_with(BootContext::new))
    }

    /// Starts the incident collector the first time through.
    async fn start_event_bus(&self) {
        if let Some(mut rx) = self.inner.incident_rx.lock().await.take() {
            let health = self.inner.health.clone();
            let events = self.inner.events.clone();

            tokio::spawn(async move {
                while let Some(report) = rx.recv().await {
                    record_incident(
                        &health,
                        &events,
                        report.severity,
                        &report.component,
                        &report.description,
                    )
                    .await;
                }
            });
        }

        self.update_health(EVENT_BUS, HealthStatus::Healthy, None, None)
            .await;
    }

    /// Initializes the components belonging to `phase`, in start order.
    async fn start_components(&self, phase: BootPhase) -> KernelResult<()> {
        let components: Vec<Arc<dyn Component>> = self
            .inner
            .components
            .read()
            .await
            .values()
            .filter(|c| c.kind().phase() == phase)
            .cloned()
            .collect();

        let config = &self.inner.config;
        for component in components {
            let kind = component.kind();
            let Err(e) = self.start_component(component.as_ref()).await else {
                continue;
            };

            let tolerated = phase == BootPhase::StartCoreEngines
                && config.safe_mode_enabled
                && config.is_disabled_in_safe_mode(kind);
            if !tolerated {
                return Err(KernelError::Component { kind, source: e });
            }

            warn!(component = %kind, error = %e, "Non-critical component failed, continuing degraded");
            self.log_incident(
                Severity::High,
                kind.as_str(),
                format!("Initialization failed: {e}"),
            )
            .await;
        }

        Ok(())
    }

    /// Initializes one component and records the result in health.
    async fn start_component(&self, component: &dyn Component) -> Result<(), ComponentError> {
        let kind = component.kind();
        let ctx = ComponentContext {
            kind,
            incidents: IncidentReporter::new(kind, self.inner.incident_tx.clone()),
        };

        match component.initialize(&ctx).await {
            Ok(()) => {
                self.inner.active.lock().await.insert(kind);
                self.update_health(kind.as_str(), HealthStatus::Healthy, None, None)
                    .await;
                info!(component = %kind, "Component started");
                Ok(())
            }
            Err(e) => {
                self.update_health(kind.as_str(), HealthStatus::Failed, Some(e.to_string()), None)
                    .await;
                Err(e)
            }
        }
    }

    async fn finish_boot(&self, elapsed: Duration) {
        self.set_state(KernelState::Ready);
        self.inner.health.write().await.booted_at = Some(Utc::now());
        self.fire(&LifecycleEvent::Ready);

        self.start_monitor().await;
        self.set_state(KernelState::Running);

        let components = self.inner.active.lock().await.len();
        let boot_time_ms = elapsed.as_millis() as u64;
        info!(
            version = %self.inner.config.version,
            boot_time_ms,
            components,
            "Kernel booted"
        );
        self.emit(KernelEvent::BootComplete {
            version: self.inner.config.version.clone(),
            boot_time_ms,
            components,
        });
    }

    /// Shuts down the non-critical components and keeps the rest serving,
    /// starting any of them the failed boot left down.
    async fn enter_safe_mode(&self) {
        self.set_state(KernelState::SafeMode);
        warn!("Entering safe mode, limited functionality available");

        let disabled: Vec<(ComponentKind, Arc<dyn Component>)> = self
            .inner
            .components
            .read()
            .await
            .iter()
            .rev()
            .filter(|(kind, _)| self.inner.config.is_disabled_in_safe_mode(**kind))
            .map(|(kind, component)| (*kind, component.clone()))
            .collect();

        for (kind, component) in &disabled {
            let was_active = self.inner.active.lock().await.remove(kind);
            if was_active {
                if let Err(e) = component.shutdown().await {
                    warn!(component = %kind, error = %e, "Failed to stop component for safe mode");
                }
            }
            self.update_health(
                kind.as_str(),
                HealthStatus::Degraded,
                Some("disabled in safe mode".to_string()),
                None,
            )
            .await;
        }

        self.start_critical_components().await;
        self.inner.health.write().await.booted_at = Some(Utc::now());

        let available: Vec<String> = self
            .inner
            .active
            .lock()
            .await
            .iter()
            .map(|kind| kind.as_str().to_string())
            .collect();
        info!(?available, "Safe mode active");

        self.emit(KernelEvent::SafeModeEntered {
            disabled: disabled.into_iter().map(|(kind, _)| kind).collect(),
            available,
        });
        self.start_monitor().await;
    }

    /// Starts every component safe mode keeps that the failed boot never
    /// reached (or that recovery stopped). Each gets `max_boot_time`; one that
    /// still fails stays `failed` with a critical incident.
    async fn start_critical_components(&self) {
        let config = &self.inner.config;
        let missing: Vec<Arc<dyn Component>> = {
            let registry = self.inner.components.read().await;
            let active = self.inner.active.lock().await;
            registry
                .iter()
                .filter(|(kind, _)| {
                    !config.is_disabled_in_safe_mode(**kind) && !active.contains(*kind)
                })
                .map(|(_, component)| component.clone())
                .collect()
        };

        for component in missing {
            let kind = component.kind();
            let started = tokio::time::timeout(
                config.max_boot_time(),
                self.start_component(component.as_ref()),
            )
            .await;
            let result = match started {
                Ok(result) => result,
                Err(_) => {
                    let e = ComponentError::Unavailable(format!(
                        "no response within {} ms",
                        config.max_boot_time_ms
                    ));
                    self.update_health(kind.as_str(), HealthStatus::Failed, Some(e.to_string()), None)
                        .await;
                    Err(e)
                }
            };

            if let Err(e) = result {
                error!(component = %kind, error = %e, "Critical component unavailable in safe mode");
                self.log_incident(
                    Severity::Critical,
                    kind.as_str(),
                    format!("Unavailable in safe mode: {e}"),
                )
                .await;
            }
        }
    }

    /// Shuts down every active component in reverse start order and marks
    /// each one stopped in health.
    async fn stop_components(&self) {
        let kinds: Vec<ComponentKind> = {
            let mut active = self.inner.active.lock().await;
            let kinds = active.iter().rev().copied().collect();
            active.clear();
            kinds
        };

        let components: Vec<Arc<dyn Component>> = {
            let registry = self.inner.components.read().await;
            kinds.iter().filter_map(|kind| registry.get(kind).cloned()).collect()
        };

        for component in components {
            let kind = component.kind();
            let detail = match component.shutdown().await {
                Ok(()) => {
                    debug!(component = %kind, "Component stopped");
                    STOPPED.to_string()
                }
                Err(e) => {
                    warn!(component = %kind, error = %e, "Component shutdown failed");
                    format!("{STOPPED}: {e}")
                }
            };
            self.update_health(kind.as_str(), HealthStatus::Degraded, Some(detail), None)
                .await;
        }
    }

    // =========================================================================
    // Shutdown & Restart
    // =========================================================================

    pub async fn shutdown(&self) {
        let current = self.state();
        if matches!(current, KernelState::ShuttingDown | KernelState::Shutdown) {
            return;
        }

        self.set_state(KernelState::ShuttingDown);
        info!("Kernel shutting down");

        self.stop_monitor().await;
        self.fire(&LifecycleEvent::Shutdown);
        self.stop_components().await;

        let uptime_secs = self.inner.health.read().await.uptime_secs();
        self.set_state(KernelState::Shutdown);
        self.emit(KernelEvent::Shutdown { uptime_secs });
        info!(uptime_secs, "Kernel shutdown complete");
    }

    /// Shuts down, then boots again regardless of the current state.
    pub async fn force_restart(&self) -> KernelResult<BootOutcome> {
        warn!("Force restarting kernel");
        self.shutdown().await;
        self.set_state(KernelState::Uninitialized);
        self.boot().await
    }

    // =========================================================================
    // Health Monitoring
    // =========================================================================

    async fn start_monitor(&self) {
        self.stop_monitor().await;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.inner.config.health_check_interval();
        let weak: Weak<KernelInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        Kernel { inner }.scheduled_health_check().await;
                    }
                }
            }
            debug!("Health monitor stopped");
        });

        *self.inner.monitor.lock().await = Some(Monitor { cancel, handle });
    }

    async fn stop_monitor(&self) {
        let monitor = self.inner.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.cancel.cancel();
            if let Err(e) = monitor.handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Health monitor ended abnormally");
                }
            }
        }
    }

    async fn scheduled_health_check(&self) {
        let Ok(_guard) = self.inner.check_lock.try_lock() else {
            debug!("Previous health check still running, skipping tick");
            return;
        };
        self.perform_health_check().await;
    }

    /// Polls every running component now and returns the updated record.
    pub async fn check_health_now(&self) -> KernelHealth {
        {
            let _guard = self.inner.check_lock.lock().await;
            self.perform_health_check().await;
        }
        self.get_health().await
    }

    async fn perform_health_check(&self) {
        let threshold = self.inner.config.health_latency_threshold();
        let components: Vec<Arc<dyn Component>> = {
            let active = self.inner.active.lock().await;
            let registry = self.inner.components.read().await;
            active.iter().filter_map(|kind| registry.get(kind).cloned()).collect()
        };

        for component in components {
            let kind = component.kind();
            let started = Instant::now();

            match tokio::time::timeout(threshold, component.status()).await {
                Ok(status) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let previous = self
                        .inner
                        .health
                        .read()
                        .await
                        .component(kind.as_str())
                        .map(|c| c.status);

                    self.update_health(kind.as_str(), status, None, Some(elapsed_ms))
                        .await;

                    if status >= HealthStatus::Critical && previous != Some(status) {
                        self.log_incident(
                            Severity::High,
                            kind.as_str(),
                            format!("Component reported {status}"),
                        )
                        .await;
                    }
                }
                Err(_) => {
                    let threshold_ms = threshold.as_millis() as u64;
                    self.update_health(
                        kind.as_str(),
                        HealthStatus::Degraded,
                        Some(format!("no response within {threshold_ms} ms")),
                        None,
                    )
                    .await;
                    self.log_incident(
                        Severity::Medium,
                        kind.as_str(),
                        format!("Slow health check: no response within {threshold_ms} ms"),
                    )
                    .await;
                }
            }
        }

        self.inner.health.write().await.last_check = Some(Utc::now());
    }

    async fn update_health(
        &self,
        name: &str,
        status: HealthStatus,
        detail: Option<String>,
        response_time_ms: Option<u64>,
    ) {
        self.inner
            .health
            .write()
            .await
            .update_component(name, status, detail, response_time_ms);
    }

    // =========================================================================
    // Incidents & Introspection
    // =========================================================================

    async fn log_incident(
        &self,
        severity: Severity,
        component: &str,
        description: impl Into<String>,
    ) -> Incident {
        record_incident(
            &self.inner.health,
            &self.inner.events,
            severity,
            component,
            &description.into(),
        )
        .await
    }

    pub async fn resolve_incident(&self, id: Uuid) -> KernelResult<()> {
        if self.inner.health.write().await.resolve_incident(id) {
            info!(incident_id = %id, "Incident resolved");
            Ok(())
        } else {
            Err(KernelError::IncidentNotFound(id))
        }
    }

    pub async fn get_status(&self) -> KernelStatus {
        let boot = self.inner.boot.read().await.clone();
        let health = self.inner.health.read().await;

        KernelStatus {
            state: self.state(),
            version: self.inner.config.version.clone(),
            environment: self.inner.config.environment,
            health: health.overall,
            uptime_secs: health.uptime_secs(),
            components: health.components.values().cloned().collect(),
            boot,
            recovery_attempts: self.recovery_attempts(),
        }
    }

    /// Full health record, incidents included.
    pub async fn get_health(&self) -> KernelHealth {
        self.inner.health.read().await.clone()
    }
}

async fn record_incident(
    health: &RwLock<KernelHealth>,
    events: &broadcast::Sender<KernelEvent>,
    severity: Severity,
    component: &str,
    description: &str,
) -> Incident {
    let incident = health
        .write()
        .await
        .record_incident(severity, component, description);

    if severity >= Severity::High {
        warn!(component = %component, ?severity, %description, "Incident logged");
    } else {
        info!(component = %component, ?severity, %description, "Incident logged");
    }

    let _ = events.send(KernelEvent::IncidentLogged(incident.clone()));
    incident
}

// =============================================================================
// Unit Tests
// =============================================================================
