//! # Error Types
//!
//! Domain-specific error types for titan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  titan-core errors (this file)                                         │
//! │  ├── CoreError        - Sync domain rule violations                    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  titan-db errors       └── DbError      - Storage failures             │
//! │  titan-sync errors     └── SyncError    - Delivery/config failures     │
//! │  titan-kernel errors   └── KernelError  - Boot/lifecycle failures      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → operator / incident   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Sync domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Conflict cannot be found.
    ///
    /// ## When This Occurs
    /// - Operator resolves a conflict id that was never recorded
    /// - Conflict was purged after being resolved
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// Conflict was already settled.
    #[error("Conflict {0} is already resolved")]
    ConflictAlreadyResolved(String),

    /// The strategy cannot settle the conflict.
    ///
    /// ## When This Occurs
    /// - Operator "resolves" with `manual`, which only escalates
    /// - `merge` requested for a deletion or structural conflict
    ///
    /// ```text
    /// resolve_conflict_manually(id, Merge)
    ///      │
    ///      ▼
    /// conflict kind = Deletion
    ///      │
    ///      ▼
    /// UnresolvableConflict { strategy: "merge", .. }
    /// ```
    #[error("Strategy {strategy} cannot resolve conflict {conflict_id}")]
    UnresolvableConflict {
        conflict_id: String,
        strategy: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnresolvableConflict {
            conflict_id: "c-1".to_string(),
            strategy: "merge".to_string(),
        };
        assert_eq!(err.to_string(), "Strategy merge cannot resolve conflict c-1");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "payload".to_string(),
        };
        assert_eq!(err.to_string(), "payload is required");

        let err = ValidationError::OutOfRange {
            field: "max_attempts".to_string(),
            min: 1,
            max: 100,
        };
        assert_eq!(err.to_string(), "max_attempts must be between 1 and 100");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
