//! # titan-kernel: Kernel Supervisor
//!
//! Process-wide supervisor of a Titan POS terminal. Boots every subsystem in
//! a fixed order, keeps a health record with an incident log, retries a
//! failed boot and falls back to safe mode when retrying does not help.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Kernel                                     │
//! │                                                                         │
//! │   register(Arc<dyn Component>)  (before first boot only)                │
//! │                                                                         │
//! │   ┌───────────────┐   ┌───────────────┐   ┌──────────────────────────┐ │
//! │   │ Boot sequence │   │ Health monitor│   │ Incident collector       │ │
//! │   │ 6 phases,     │   │ interval poll,│   │ IncidentReporter → log   │ │
//! │   │ deadline,     │   │ latency limit │   │ (bounded, FIFO)          │ │
//! │   │ recovery      │   └───────┬───────┘   └────────────┬─────────────┘ │
//! │   └───────┬───────┘           │                        │               │
//! │           ▼                   ▼                        ▼               │
//! │   ┌─────────────────────────────────────────────────────────────────┐  │
//! │   │ KernelHealth + KernelState (watch) + KernelEvent (broadcast)    │  │
//! │   └─────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │   Components (start order): hardware → drivers → durable_store →       │
//! │   catalog → pricing → tax → sync → compliance → presentation           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use titan_kernel::{Kernel, KernelConfig, StoreComponent, CatalogComponent};
//!
//! let kernel = Kernel::new(KernelConfig::load_or_default(None));
//! kernel.register(Arc::new(StoreComponent::new(db.clone()))).await?;
//! kernel.register(Arc::new(CatalogComponent::new(&db))).await?;
//!
//! match kernel.boot().await? {
//!     BootOutcome::Ready => info!("Terminal ready"),
//!     BootOutcome::SafeMode => warn!("Terminal running in safe mode"),
//! }
//! ```
//!
//! ## Module Structure
//! - [`kernel`] - The supervisor: boot, recovery, safe mode, monitoring
//! - [`component`] - Component trait, kinds and incident reporting
//! - [`components`] - Stock components over titan-db and titan-sync
//! - [`health`] - Health record and incident log
//! - [`config`] - kernel.toml + environment overrides
//! - [`events`] - Kernel events and lifecycle hooks
//! - [`types`] - States, boot phases, status snapshots
//! - [`error`] - Kernel and component errors

pub mod component;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod kernel;
pub mod types;

pub use component::{Component, ComponentContext, ComponentKind, IncidentReport, IncidentReporter};
pub use components::{
    CatalogComponent, Connectivity, HeadlessHardware, StoreComponent, SyncEngineComponent,
};
pub use config::{Environment, KernelConfig};
pub use error::{ComponentError, KernelError, KernelResult};
pub use events::{HookPoint, KernelEvent, LifecycleEvent, LifecycleHook};
pub use health::{ComponentHealth, HealthStatus, Incident, KernelHealth, Severity};
pub use kernel::{Kernel, EVENT_BUS};
pub use types::{BootContext, BootOutcome, BootPhase, KernelState, KernelStatus};
