//! # Kernel Events & Lifecycle Hooks
//!
//! Two channels out of the kernel:
//!
//! - [`KernelEvent`] on a broadcast channel, for anything that wants to
//!   observe the kernel (operator UI, logging, the terminal app).
//! - Lifecycle hooks: synchronous closures registered per [`HookPoint`] and
//!   called in-line with a [`LifecycleEvent`]. A panicking hook is caught and
//!   logged; it never takes the kernel down.

use std::sync::Arc;

use serde::Serialize;

use crate::component::ComponentKind;
use crate::health::Incident;
use crate::types::BootPhase;

pub const KERNEL_EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    BootComplete {
        version: String,
        boot_time_ms: u64,
        components: usize,
    },
    BootFailed {
        error: String,
        recovery_attempts: u32,
        safe_mode: bool,
    },
    SafeModeEntered {
        disabled: Vec<ComponentKind>,
        available: Vec<String>,
    },
    IncidentLogged(Incident),
    Shutdown {
        uptime_secs: u64,
    },
}

/// Where a lifecycle hook attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// After each completed boot phase.
    OnBoot,
    OnReady,
    OnError,
    OnShutdown,
}

/// What a hook is called with.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Boot { phase: BootPhase, progress: f64 },
    Ready,
    Error { message: String },
    Shutdown,
}

impl LifecycleEvent {
    pub fn hook_point(&self) -> HookPoint {
        match self {
            LifecycleEvent::Boot { .. } => HookPoint::OnBoot,
            LifecycleEvent::Ready => HookPoint::OnReady,
            LifecycleEvent::Error { .. } => HookPoint::OnError,
            LifecycleEvent::Shutdown => HookPoint::OnShutdown,
        }
    }
}

pub type LifecycleHook = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_points() {
        assert_eq!(LifecycleEvent::Ready.hook_point(), HookPoint::OnReady);
        assert_eq!(
            LifecycleEvent::Boot {
                phase: BootPhase::LoadConfig,
                progress: 0.2
            }
            .hook_point(),
            HookPoint::OnBoot
        );
    }

    #[test]
    fn test_event_json() {
        let event = KernelEvent::Shutdown { uptime_secs: 12 };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"shutdown","uptime_secs":12}"#
        );
    }
}
