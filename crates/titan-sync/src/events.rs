//! # Sync Events
//!
//! Typed notifications published by the sync engine on a broadcast channel.
//! Subscribers (the kernel, an operator UI) match on the variant instead of
//! string event names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use titan_core::{ConflictKind, ConflictStrategy, SyncPriority};

/// Capacity of the event channel. Slow subscribers lag and skip events
/// rather than block the engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, background loop not started.
    Idle,
    /// Background loop running, waiting for work.
    Running,
    /// A drain is in progress.
    Draining,
    /// Shut down; no further drains.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Draining => write!(f, "draining"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Something the sync engine wants the rest of the terminal to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A change was accepted into the durable queue.
    ItemQueued {
        queue_key: String,
        priority: SyncPriority,
        seq: i64,
    },

    /// A batch finished (fully or partially, see counters).
    BatchCompleted {
        batch_id: Uuid,
        synced: usize,
        requeued: usize,
        failed: usize,
        conflicted: usize,
    },

    /// An item exhausted its attempts or was rejected for good.
    /// It stays in the queue as `failed` until retried.
    ItemFailed {
        queue_key: String,
        attempts: u32,
        error: String,
    },

    /// A conflict was detected and settled automatically.
    ConflictResolved {
        conflict_id: Uuid,
        queue_key: String,
        kind: ConflictKind,
        strategy: ConflictStrategy,
    },

    /// A conflict needs an operator. High priority.
    ManualResolutionNeeded {
        conflict_id: Uuid,
        queue_key: String,
        kind: ConflictKind,
    },

    /// Connectivity as seen by the engine changed.
    OnlineChanged { online: bool },

    StateChanged { state: EngineState },
}

impl SyncEvent {
    /// Events an operator must act on.
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            SyncEvent::ManualResolutionNeeded { .. } | SyncEvent::ItemFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = SyncEvent::OnlineChanged { online: true };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"online_changed","online":true}"#);
    }

    #[test]
    fn test_priority_classification() {
        let manual = SyncEvent::ManualResolutionNeeded {
            conflict_id: Uuid::new_v4(),
            queue_key: "product:p1".into(),
            kind: ConflictKind::Deletion,
        };
        assert!(manual.is_high_priority());
        assert!(!SyncEvent::StateChanged {
            state: EngineState::Running
        }
        .is_high_priority());
    }
}
