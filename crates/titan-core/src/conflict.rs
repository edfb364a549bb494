//! # Conflict Resolution Rules
//!
//! Pure functions that classify a local/remote divergence and decide how it
//! settles. The sync engine applies the returned [`Resolution`] to the queue
//! and the snapshot cache; nothing here touches storage.
//!
//! ## Strategy Table
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────────┐
//! │ Strategy     │ Outcome                                                  │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ ClientWins   │ KeepLocal  (re-send local, version above remote)         │
//! │ ServerWins   │ AcceptRemote (drop local, cache remote)                  │
//! │ LatestWins   │ higher origin timestamp wins, ties go to the server      │
//! │ Merge        │ remote fields overlaid with local fields (updates only)  │
//! │              │ anything else escalates                                  │
//! │ Manual       │ Escalate                                                 │
//! └──────────────┴──────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;

use crate::types::{ConflictKind, ConflictStrategy, RemoteState, SyncItem, SyncOperation};

/// Decision for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Re-send the local change. The item carries a version above the remote one.
    KeepLocal(SyncItem),
    /// Drop the local change and adopt the remote state.
    AcceptRemote,
    /// Re-send a merged change.
    Merged(SyncItem),
    /// No automatic answer; an operator must decide.
    Escalate,
}

impl Resolution {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Resolution::Escalate)
    }
}

/// Classifies a divergence.
///
/// ## Rules
/// - either side deleted the entity → `Deletion`
/// - payloads of different JSON shapes (object vs array vs scalar) → `Structural`
/// - otherwise → `Version`
pub fn classify(local: &SyncItem, remote: &RemoteState) -> ConflictKind {
    if remote.deleted || local.operation == SyncOperation::Delete {
        return ConflictKind::Deletion;
    }
    if !same_shape(&local.payload, &remote.payload) {
        return ConflictKind::Structural;
    }
    ConflictKind::Version
}

fn same_shape(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Object(_), Value::Object(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Null, _)
            | (_, Value::Null)
    ) || (!a.is_object() && !a.is_array() && !b.is_object() && !b.is_array())
}

/// Decides how a conflict settles under `strategy`.
///
/// Deterministic: the same inputs always produce the same resolution, so two
/// terminals applying `LatestWins` to the same pair converge on the newer
/// payload regardless of which one saw the conflict first.
pub fn resolve(
    strategy: ConflictStrategy,
    kind: ConflictKind,
    local: &SyncItem,
    remote: &RemoteState,
) -> Resolution {
    match strategy {
        ConflictStrategy::ClientWins => Resolution::KeepLocal(rebase(local, remote)),
        ConflictStrategy::ServerWins => Resolution::AcceptRemote,
        ConflictStrategy::LatestWins => {
            if local.origin_timestamp > remote.timestamp {
                Resolution::KeepLocal(rebase(local, remote))
            } else {
                Resolution::AcceptRemote
            }
        }
        ConflictStrategy::Merge => match merge(kind, local, remote) {
            Some(item) => Resolution::Merged(item),
            None => Resolution::Escalate,
        },
        ConflictStrategy::Manual => Resolution::Escalate,
    }
}

/// Shallow merge: remote fields first, local fields on top.
///
/// Only defined for update-vs-update conflicts between two JSON objects.
pub fn merge(kind: ConflictKind, local: &SyncItem, remote: &RemoteState) -> Option<SyncItem> {
    if kind != ConflictKind::Version || local.operation != SyncOperation::Update {
        return None;
    }
    let (Value::Object(local_fields), Value::Object(remote_fields)) =
        (&local.payload, &remote.payload)
    else {
        return None;
    };

    let mut merged = remote_fields.clone();
    for (key, value) in local_fields {
        merged.insert(key.clone(), value.clone());
    }

    let mut item = rebase(local, remote);
    item.payload = Value::Object(merged);
    Some(item)
}

/// Copy of the local item that will overwrite the remote on the next push.
fn rebase(local: &SyncItem, remote: &RemoteState) -> SyncItem {
    let mut item = local.clone();
    item.version = local.version.max(remote.version) + 1;
    item.last_error = None;
    item
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ENTITY_PRODUCT;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn local_at(secs: i64, payload: Value) -> SyncItem {
        SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Update, payload)
            .with_version(3)
            .with_timestamp(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn remote_at(secs: i64, payload: Value) -> RemoteState {
        RemoteState {
            payload,
            version: 5,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            deleted: false,
        }
    }

    #[test]
    fn test_classify() {
        let local = local_at(10, json!({"price": 1}));
        assert_eq!(classify(&local, &remote_at(5, json!({"price": 2}))), ConflictKind::Version);
        assert_eq!(classify(&local, &remote_at(5, json!([1, 2]))), ConflictKind::Structural);

        let mut gone = remote_at(5, Value::Null);
        gone.deleted = true;
        assert_eq!(classify(&local, &gone), ConflictKind::Deletion);
    }

    #[test]
    fn test_latest_wins_is_order_independent() {
        let t1 = 1_000;
        let t2 = t1 + 60;

        // Local is newer: local payload survives.
        let local = local_at(t2, json!({"name": "new"}));
        let remote = remote_at(t1, json!({"name": "old"}));
        match resolve(ConflictStrategy::LatestWins, ConflictKind::Version, &local, &remote) {
            Resolution::KeepLocal(item) => {
                assert_eq!(item.payload, json!({"name": "new"}));
                assert_eq!(item.version, 6);
            }
            other => panic!("expected KeepLocal, got {other:?}"),
        }

        // Remote is newer: remote payload survives.
        let local = local_at(t1, json!({"name": "old"}));
        let remote = remote_at(t2, json!({"name": "new"}));
        assert_eq!(
            resolve(ConflictStrategy::LatestWins, ConflictKind::Version, &local, &remote),
            Resolution::AcceptRemote
        );
    }

    #[test]
    fn test_latest_wins_tie_goes_to_server() {
        let local = local_at(100, json!({}));
        let remote = remote_at(100, json!({}));
        assert_eq!(
            resolve(ConflictStrategy::LatestWins, ConflictKind::Version, &local, &remote),
            Resolution::AcceptRemote
        );
    }

    #[test]
    fn test_merge_overlays_local_fields() {
        let local = local_at(10, json!({"price": 199, "name": "Cola"}));
        let remote = remote_at(20, json!({"price": 149, "stock": 7}));
        match resolve(ConflictStrategy::Merge, ConflictKind::Version, &local, &remote) {
            Resolution::Merged(item) => {
                assert_eq!(item.payload, json!({"price": 199, "name": "Cola", "stock": 7}));
            }
            other => panic!("expected Merged, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_falls_back_to_manual_for_deletions() {
        let local = local_at(10, json!({"price": 1}));
        let mut remote = remote_at(20, Value::Null);
        remote.deleted = true;
        let kind = classify(&local, &remote);
        assert!(resolve(ConflictStrategy::Merge, kind, &local, &remote).is_escalation());
    }

    #[test]
    fn test_client_and_server_wins() {
        let local = local_at(10, json!({"a": 1}));
        let remote = remote_at(20, json!({"a": 2}));
        assert!(matches!(
            resolve(ConflictStrategy::ClientWins, ConflictKind::Version, &local, &remote),
            Resolution::KeepLocal(_)
        ));
        assert_eq!(
            resolve(ConflictStrategy::ServerWins, ConflictKind::Version, &local, &remote),
            Resolution::AcceptRemote
        );
        assert!(resolve(ConflictStrategy::Manual, ConflictKind::Version, &local, &remote)
            .is_escalation());
    }
}
