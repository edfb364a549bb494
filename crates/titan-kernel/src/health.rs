//! # Kernel Health
//!
//! The kernel's health record: one [`ComponentHealth`] per component, a
//! bounded incident log and the aggregate status.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ KernelHealth                                              │
//! │                                                           │
//! │  overall = worst(components)                              │
//! │                                                           │
//! │  components   "durable_store" ─► Healthy  (errors: 0)     │
//! │               "catalog"       ─► Healthy  (errors: 0)     │
//! │               "sync"          ─► Degraded (errors: 0)     │
//! │                                                           │
//! │  incidents    [oldest ... newest]   max_incidents, FIFO   │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health of a component or of the whole kernel. Ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Critical,
    Failed,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    /// Times this component was seen `failed`. Diagnostics only.
    pub error_count: u32,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub component: String,
    pub description: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Process-wide health record, owned by the kernel.
#[derive(Debug, Clone, Serialize)]
pub struct KernelHealth {
    pub overall: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub incidents: VecDeque<Incident>,
    pub last_check: Option<DateTime<Utc>>,
    /// Set when the kernel became operational.
    pub booted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    max_incidents: usize,
}

impl KernelHealth {
    pub fn new(max_incidents: usize) -> Self {
        Self {
            overall: HealthStatus::Healthy,
            components: BTreeMap::new(),
            incidents: VecDeque::new(),
            last_check: None,
            booted_at: None,
            max_incidents: max_incidents.max(1),
        }
    }

    /// Records a component's status. A `failed` status bumps its error count.
    pub fn update_component(
        &mut self,
        name: &str,
        status: HealthStatus,
        detail: Option<String>,
        response_time_ms: Option<u64>,
    ) {
        let error_count = self
            .components
            .get(name)
            .map(|c| c.error_count)
            .unwrap_or(0)
            + u32::from(status == HealthStatus::Failed);

        self.components.insert(
            name.to_string(),
            ComponentHealth {
                name: name.to_string(),
                status,
                last_check: Utc::now(),
                response_time_ms,
                error_count,
                detail,
            },
        );
        self.recompute_overall();
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }

    pub fn recompute_overall(&mut self) {
        self.overall = self
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or_default();
    }

    /// Appends an incident, evicting the oldest once the log is full.
    pub fn record_incident(
        &mut self,
        severity: Severity,
        component: impl Into<String>,
        description: impl Into<String>,
    ) -> Incident {
        let incident = Incident {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            component: component.into(),
            description: description.into(),
            resolved: false,
            resolved_at: None,
        };

        self.incidents.push_back(incident.clone());
        while self.incidents.len() > self.max_incidents {
            self.incidents.pop_front();
        }
        incident
    }

    /// ## Returns
    /// `false` if no incident with that id is still in the log.
    pub fn resolve_incident(&mut self, id: Uuid) -> bool {
        match self.incidents.iter_mut().find(|i| i.id == id) {
            Some(incident) => {
                if !incident.resolved {
                    incident.resolved = true;
                    incident.resolved_at = Some(Utc::now());
                }
                true
            }
            None => false,
        }
    }

    pub fn unresolved(&self) -> Vec<Incident> {
        self.incidents.iter().filter(|i| !i.resolved).cloned().collect()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.booted_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_is_worst_component() {
        let mut health = KernelHealth::new(10);
        assert_eq!(health.overall, HealthStatus::Healthy);

        health.update_component("catalog", HealthStatus::Healthy, None, Some(2));
        health.update_component("sync", HealthStatus::Degraded, None, None);
        assert_eq!(health.overall, HealthStatus::Degraded);

        health.update_component("pricing", HealthStatus::Failed, Some("boom".into()), None);
        assert_eq!(health.overall, HealthStatus::Failed);

        health.update_component("pricing", HealthStatus::Healthy, None, None);
        assert_eq!(health.overall, HealthStatus::Degraded);
    }

    #[test]
    fn test_error_count_survives_recovery() {
        let mut health = KernelHealth::new(10);
        health.update_component("tax", HealthStatus::Failed, None, None);
        health.update_component("tax", HealthStatus::Healthy, None, None);
        health.update_component("tax", HealthStatus::Failed, None, None);
        assert_eq!(health.component("tax").unwrap().error_count, 2);
    }

    #[test]
    fn test_incident_log_is_bounded() {
        let mut health = KernelHealth::new(3);
        let first = health.record_incident(Severity::Low, "sync", "one");
        for n in 0..3 {
            health.record_incident(Severity::Medium, "sync", format!("more {n}"));
        }

        assert_eq!(health.incidents.len(), 3);
        assert!(!health.resolve_incident(first.id));
        assert_eq!(health.incidents.front().unwrap().description, "more 0");
    }

    #[test]
    fn test_resolve_incident() {
        let mut health = KernelHealth::new(10);
        let incident = health.record_incident(Severity::High, "catalog", "cache stale");
        assert_eq!(health.unresolved().len(), 1);

        assert!(health.resolve_incident(incident.id));
        assert!(health.unresolved().is_empty());
        assert!(health.incidents[0].resolved_at.is_some());
    }

    #[test]
    fn test_health_status_ordering() {
        assert!(HealthStatus::Failed > HealthStatus::Critical);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
    }
}
