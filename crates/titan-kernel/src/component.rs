//! # Component Contract
//!
//! Everything the kernel supervises implements [`Component`]. Components are
//! identified by a closed [`ComponentKind`]; the kind alone fixes the boot
//! phase a component starts in and its position inside that phase, so the
//! dependency order is static.
//!
//! ```text
//! Phase                  Kinds (start order →)
//! ─────────────────────  ──────────────────────────────────────────────────
//! initialize_hardware    hardware
//! register_drivers       drivers
//! start_core_engines     durable_store → catalog → pricing → tax → sync
//!                        → compliance
//! mount_presentation     presentation
//! ```
//!
//! Shutdown runs the same list backwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ComponentError;
use crate::health::{HealthStatus, Severity};
use crate::types::BootPhase;

/// Kinds of supervised subsystems, in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Hardware,
    Drivers,
    DurableStore,
    Catalog,
    Pricing,
    Tax,
    Sync,
    Compliance,
    Presentation,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 9] = [
        ComponentKind::Hardware,
        ComponentKind::Drivers,
        ComponentKind::DurableStore,
        ComponentKind::Catalog,
        ComponentKind::Pricing,
        ComponentKind::Tax,
        ComponentKind::Sync,
        ComponentKind::Compliance,
        ComponentKind::Presentation,
    ];

    /// Health record key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Hardware => "hardware",
            ComponentKind::Drivers => "drivers",
            ComponentKind::DurableStore => "durable_store",
            ComponentKind::Catalog => "catalog",
            ComponentKind::Pricing => "pricing",
            ComponentKind::Tax => "tax",
            ComponentKind::Sync => "sync",
            ComponentKind::Compliance => "compliance",
            ComponentKind::Presentation => "presentation",
        }
    }

    /// Boot phase this kind starts in.
    pub fn phase(&self) -> BootPhase {
        match self {
            ComponentKind::Hardware => BootPhase::InitializeHardware,
            ComponentKind::Drivers => BootPhase::RegisterDrivers,
            ComponentKind::DurableStore
            | ComponentKind::Catalog
            | ComponentKind::Pricing
            | ComponentKind::Tax
            | ComponentKind::Sync
            | ComponentKind::Compliance => BootPhase::StartCoreEngines,
            ComponentKind::Presentation => BootPhase::MountPresentation,
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown component: {s}"))
    }
}

// =============================================================================
// Incident Reporting
// =============================================================================

/// An incident raised by a component, on its way to the kernel's log.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentReport {
    pub component: String,
    pub severity: Severity,
    pub description: String,
}

/// Channel a component uses to raise incidents without touching kernel state.
#[derive(Debug, Clone)]
pub struct IncidentReporter {
    component: ComponentKind,
    tx: mpsc::Sender<IncidentReport>,
}

impl IncidentReporter {
    pub(crate) fn new(component: ComponentKind, tx: mpsc::Sender<IncidentReport>) -> Self {
        Self { component, tx }
    }

    /// Queues an incident. Never blocks; a full channel drops the report.
    pub fn report(&self, severity: Severity, description: impl Into<String>) {
        let report = IncidentReport {
            component: self.component.as_str().to_string(),
            severity,
            description: description.into(),
        };
        if let Err(e) = self.tx.try_send(report) {
            warn!(component = %self.component, error = %e, "Incident dropped");
        }
    }
}

/// Handed to [`Component::initialize`].
#[derive(Debug, Clone)]
pub struct ComponentContext {
    pub kind: ComponentKind,
    pub incidents: IncidentReporter,
}

// =============================================================================
// Component Trait
// =============================================================================

/// Lifecycle contract of a supervised subsystem.
///
/// `initialize` may be called again after `shutdown` (recovery, forced
/// restart); implementations must support that cycle.
#[async_trait]
pub trait Component: Send + Sync {
    fn kind(&self) -> ComponentKind;

    async fn initialize(&self, ctx: &ComponentContext) -> Result<(), ComponentError>;

    async fn shutdown(&self) -> Result<(), ComponentError>;

    /// Current health. Polled by the health monitor under a latency limit.
    async fn status(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_matches_phase_order() {
        let phases: Vec<BootPhase> = ComponentKind::ALL.iter().map(|k| k.phase()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Sync".parse::<ComponentKind>(), Ok(ComponentKind::Sync));
        assert_eq!(
            "durable_store".parse::<ComponentKind>(),
            Ok(ComponentKind::DurableStore)
        );
        assert!("printer".parse::<ComponentKind>().is_err());
    }

    #[tokio::test]
    async fn test_reporter_tags_component() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = IncidentReporter::new(ComponentKind::Sync, tx);

        reporter.report(Severity::High, "conflict needs an operator");
        let report = rx.recv().await.unwrap();
        assert_eq!(report.component, "sync");
        assert_eq!(report.severity, Severity::High);
    }
}
