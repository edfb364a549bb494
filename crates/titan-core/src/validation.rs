//! # Validation Module
//!
//! Input validation for change records before they reach the durable queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Domain engine                                                │
//! │  └── Builds the SyncItem from a committed local change                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: SyncEngine::enqueue (Rust)                                   │
//! │  └── THIS MODULE: key, payload and attempt rules                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── PRIMARY KEY on queue_key (one row per entity)                     │
//! │  └── CHECK constraints on status columns                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use serde_json::json;
//! use titan_core::validation::validate_sync_item;
//! use titan_core::{SyncItem, SyncOperation};
//!
//! let item = SyncItem::new("product", "p-1", SyncOperation::Create, json!({"name": "Cola"}));
//! assert!(validate_sync_item(&item).is_ok());
//! ```

use crate::error::ValidationError;
use crate::types::{SyncItem, SyncOperation};
use crate::MAX_ATTEMPTS_CEILING;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Key Validators
// =============================================================================

/// Validates an entity type.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Lowercase ASCII letters, digits and underscores only (no `:`, which
///   separates the queue key)
pub fn validate_entity_type(entity_type: &str) -> ValidationResult<()> {
    if entity_type.is_empty() {
        return Err(ValidationError::Required {
            field: "entity_type".to_string(),
        });
    }

    if entity_type.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "entity_type".to_string(),
            max: 64,
        });
    }

    if !entity_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "entity_type".to_string(),
            reason: "only lowercase letters, digits and underscores allowed".to_string(),
        });
    }

    Ok(())
}

/// Validates an entity id: non-blank and at most 128 characters.
pub fn validate_entity_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    if id.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: 128,
        });
    }

    Ok(())
}

/// Validates an attempt ceiling.
pub fn validate_max_attempts(max_attempts: u32) -> ValidationResult<()> {
    if max_attempts == 0 || max_attempts > MAX_ATTEMPTS_CEILING {
        return Err(ValidationError::OutOfRange {
            field: "max_attempts".to_string(),
            min: 1,
            max: MAX_ATTEMPTS_CEILING as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Item Validator
// =============================================================================

/// Validates a change record before it is queued.
///
/// ## Rules
/// - entity type and id pass their validators
/// - version is positive
/// - creates and updates carry a non-null payload
/// - attempt ceiling in `1..=MAX_ATTEMPTS_CEILING`
pub fn validate_sync_item(item: &SyncItem) -> ValidationResult<()> {
    validate_entity_type(&item.entity_type)?;
    validate_entity_id(&item.id)?;

    if item.version <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "version".to_string(),
        });
    }

    if item.operation != SyncOperation::Delete && item.payload.is_null() {
        return Err(ValidationError::Required {
            field: "payload".to_string(),
        });
    }

    validate_max_attempts(item.max_attempts)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_entity_type() {
        assert!(validate_entity_type("product").is_ok());
        assert!(validate_entity_type("inventory_delta").is_ok());

        assert!(validate_entity_type("").is_err());
        assert!(validate_entity_type("Product").is_err());
        assert!(validate_entity_type("product:x").is_err());
        assert!(validate_entity_type(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_entity_id() {
        assert!(validate_entity_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_entity_id("   ").is_err());
        assert!(validate_entity_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_sync_item() {
        let item = SyncItem::new("product", "p1", SyncOperation::Update, json!({"a": 1}));
        assert!(validate_sync_item(&item).is_ok());

        let delete = SyncItem::new("product", "p1", SyncOperation::Delete, json!(null));
        assert!(validate_sync_item(&delete).is_ok());

        let empty = SyncItem::new("product", "p1", SyncOperation::Create, json!(null));
        assert!(matches!(
            validate_sync_item(&empty),
            Err(ValidationError::Required { .. })
        ));

        let bad_version = item.clone().with_version(0);
        assert!(validate_sync_item(&bad_version).is_err());

        let no_attempts = item.with_max_attempts(0);
        assert!(validate_sync_item(&no_attempts).is_err());
    }
}
