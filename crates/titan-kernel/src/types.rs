//! # Kernel State & Boot Types
//!
//! ## State Machine
//! ```text
//!                    boot()
//! UNINITIALIZED ───────────► INITIALIZING ──► BOOTING (phases) ──► READY ──► RUNNING
//!      ▲                                           │
//!      │ recovery attempt left                     │ phase failed / timeout
//!      └────────────────────────────────────── ERROR ◄┘
//!                                                  │ attempts exhausted
//!                                                  ▼
//!                                              SAFE_MODE
//!
//! any ──shutdown()──► SHUTTING_DOWN ──► SHUTDOWN ──force_restart()──► UNINITIALIZED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Environment;
use crate::health::{ComponentHealth, HealthStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Uninitialized,
    Initializing,
    Booting,
    Ready,
    Running,
    SafeMode,
    Error,
    ShuttingDown,
    Shutdown,
}

impl KernelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelState::Uninitialized => "uninitialized",
            KernelState::Initializing => "initializing",
            KernelState::Booting => "booting",
            KernelState::Ready => "ready",
            KernelState::Running => "running",
            KernelState::SafeMode => "safe_mode",
            KernelState::Error => "error",
            KernelState::ShuttingDown => "shutting_down",
            KernelState::Shutdown => "shutdown",
        }
    }

    /// The terminal can take sales in this state.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            KernelState::Ready | KernelState::Running | KernelState::SafeMode
        )
    }
}

impl std::fmt::Display for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boot phases, in the only order they ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootPhase {
    LoadConfig,
    InitializeHardware,
    RegisterDrivers,
    StartEventBus,
    StartCoreEngines,
    MountPresentation,
    Complete,
}

impl BootPhase {
    /// The fixed boot sequence (without the terminal `Complete` marker).
    pub const SEQUENCE: [BootPhase; 6] = [
        BootPhase::LoadConfig,
        BootPhase::InitializeHardware,
        BootPhase::RegisterDrivers,
        BootPhase::StartEventBus,
        BootPhase::StartCoreEngines,
        BootPhase::MountPresentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootPhase::LoadConfig => "load_config",
            BootPhase::InitializeHardware => "initialize_hardware",
            BootPhase::RegisterDrivers => "register_drivers",
            BootPhase::StartEventBus => "start_event_bus",
            BootPhase::StartCoreEngines => "start_core_engines",
            BootPhase::MountPresentation => "mount_presentation",
            BootPhase::Complete => "complete",
        }
    }

    /// Operator-facing status line.
    pub fn message(&self) -> &'static str {
        match self {
            BootPhase::LoadConfig => "Loading configuration...",
            BootPhase::InitializeHardware => "Initializing hardware layer...",
            BootPhase::RegisterDrivers => "Registering device drivers...",
            BootPhase::StartEventBus => "Starting event bus...",
            BootPhase::StartCoreEngines => "Starting core engines...",
            BootPhase::MountPresentation => "Mounting presentation layer...",
            BootPhase::Complete => "Boot complete",
        }
    }
}

impl std::fmt::Display for BootPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one boot attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootContext {
    pub phase: BootPhase,
    /// Monotonic, in `[0, 1]`.
    pub progress: f64,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl BootContext {
    pub fn new() -> Self {
        Self {
            phase: BootPhase::LoadConfig,
            progress: 0.0,
            message: "Initializing kernel...".to_string(),
            started_at: Utc::now(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, phase: BootPhase) {
        self.phase = phase;
        self.message = phase.message().to_string();
    }

    /// Marks `phase` done; progress becomes `(index + 1) / total`.
    pub(crate) fn complete(&mut self, phase: BootPhase) {
        let total = BootPhase::SEQUENCE.len();
        if let Some(index) = BootPhase::SEQUENCE.iter().position(|p| *p == phase) {
            let progress = (index + 1) as f64 / total as f64;
            self.progress = self.progress.max(progress);
        }
        if phase == BootPhase::Complete {
            self.phase = BootPhase::Complete;
            self.message = phase.message().to_string();
            self.progress = 1.0;
        }
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

impl Default for BootContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How a successful `boot()` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootOutcome {
    /// Every phase completed.
    Ready,
    /// Recovery exhausted; critical components only.
    SafeMode,
}

/// Snapshot returned by `Kernel::get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct KernelStatus {
    pub state: KernelState,
    pub version: String,
    pub environment: Environment,
    pub health: HealthStatus,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
    pub boot: Option<BootContext>,
    pub recovery_attempts: u32,
}
