//! # Kernel Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kernel Error Types                               │
//! │                                                                         │
//! │  Lifecycle Errors                                                       │
//! │  ├── AlreadyBooted       - boot() outside UNINITIALIZED                 │
//! │  ├── RegistrationClosed  - register() after the first boot              │
//! │  ├── DuplicateComponent  - two components of the same kind              │
//! │  └── BootFailed          - recovery exhausted, safe mode disabled       │
//! │                                                                         │
//! │  Boot Errors (recorded in BootContext, drive recovery)                  │
//! │  ├── BootTimeout         - boot exceeded max_boot_time                  │
//! │  └── Component           - a component failed to initialize             │
//! │                                                                         │
//! │  Configuration Errors                                                   │
//! │  ├── InvalidConfig / ConfigLoadFailed / ConfigSaveFailed                │
//! │                                                                         │
//! │  Operator Errors                                                        │
//! │  └── IncidentNotFound                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use uuid::Uuid;

use crate::component::ComponentKind;
use crate::types::KernelState;

/// Failure reported by a component through its lifecycle contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// A dependency the component needs is not there.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum KernelError {
    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Cannot boot kernel in state: {0}")]
    AlreadyBooted(KernelState),

    #[error("Components can only be registered before the first boot")]
    RegistrationClosed,

    #[error("Component already registered: {0}")]
    DuplicateComponent(ComponentKind),

    #[error("Boot failed after {attempts} recovery attempts: {reason}")]
    BootFailed { attempts: u32, reason: String },

    // =========================================================================
    // Boot Errors
    // =========================================================================
    #[error("Boot did not complete within {0} ms")]
    BootTimeout(u64),

    #[error("{kind} failed: {source}")]
    Component {
        kind: ComponentKind,
        #[source]
        source: ComponentError,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid kernel configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Operator Errors
    // =========================================================================
    #[error("Incident not found: {0}")]
    IncidentNotFound(Uuid),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        KernelError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for KernelError {
    fn from(err: toml::de::Error) -> Self {
        KernelError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for KernelError {
    fn from(err: toml::ser::Error) -> Self {
        KernelError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_error_display() {
        let err = KernelError::Component {
            kind: ComponentKind::Catalog,
            source: ComponentError::InitFailed("cache missing".into()),
        };
        assert_eq!(err.to_string(), "catalog failed: Initialization failed: cache missing");
    }

    #[test]
    fn test_lifecycle_error_display() {
        assert_eq!(
            KernelError::BootFailed { attempts: 3, reason: "tax failed".into() }.to_string(),
            "Boot failed after 3 recovery attempts: tax failed"
        );
        assert_eq!(
            KernelError::BootTimeout(1500).to_string(),
            "Boot did not complete within 1500 ms"
        );
    }
}
