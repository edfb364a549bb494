//! # Sync Protocol Messages
//!
//! Message types exchanged with the sync hub over the WebSocket remote.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  HANDSHAKE FLOW                                                        │
//! │  ──────────────                                                        │
//! │  TERMINAL ───► Hello { device_id, protocol_version }                   │
//! │  HUB      ◄─── Welcome { hub_device_id, server_time }                  │
//! │                                                                         │
//! │  CHANGE DELIVERY (one item at a time)                                  │
//! │  ────────────────────────────────────                                  │
//! │  TERMINAL ───► Push { request_id, item }                               │
//! │  HUB      ◄─── PushAccepted { request_id, remote_version }             │
//! │           or   PushConflict { request_id, remote }                     │
//! │           or   PushRejected { request_id, reason, retryable }          │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  Both      ◄──► Ping { timestamp }                                     │
//! │  Both      ◄──► Pong { timestamp }                                     │
//! │                                                                         │
//! │  ERROR                                                                 │
//! │  ─────                                                                 │
//! │  Both      ◄──► Error { code, message }                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! The hub deduplicates pushes by `(entity_type, id, version)`. A terminal
//! that crashed after sending but before the ack simply pushes again.
//!
//! ## Wire Format (JSON)
//! Messages are serialized as tagged JSON using serde's adjacently tagged enum:
//! ```json
//! { "type": "Push", "payload": { "requestId": "...", "item": { ... } } }
//! ```

use serde::{Deserialize, Serialize};
use titan_core::{RemoteState, SyncItem};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 3;

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All sync protocol messages.
///
/// Uses serde's adjacently tagged enum for clean JSON serialization:
/// `{ "type": "Hello", "payload": { ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncMessage {
    // =========================================================================
    // Handshake Messages
    // =========================================================================

    /// Sent by the terminal right after the socket opens.
    Hello(HelloPayload),

    /// Hub's answer to Hello.
    Welcome(WelcomePayload),

    // =========================================================================
    // Delivery Messages
    // =========================================================================

    /// One change record for the hub to apply.
    Push(PushRequest),

    /// The hub applied the change.
    #[serde(rename_all = "camelCase")]
    PushAccepted {
        request_id: String,
        remote_version: i64,
    },

    /// The hub holds a newer or diverging version.
    #[serde(rename_all = "camelCase")]
    PushConflict {
        request_id: String,
        remote: RemoteState,
    },

    /// The hub refused the change.
    #[serde(rename_all = "camelCase")]
    PushRejected {
        request_id: String,
        reason: String,
        #[serde(default)]
        retryable: bool,
    },

    // =========================================================================
    // Keepalive Messages
    // =========================================================================

    /// Ping for keepalive.
    Ping { timestamp: String },

    /// Pong response for keepalive.
    Pong {
        ping_timestamp: String,
        pong_timestamp: String,
    },

    // =========================================================================
    // Error Messages
    // =========================================================================

    /// Error message.
    Error { code: String, message: String },
}

// =============================================================================
// Payloads
// =============================================================================

/// Hello message sent by the terminal on connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    /// Device identifier.
    pub device_id: String,

    /// Device name (human-readable).
    pub device_name: String,

    /// Protocol version supported by this device.
    pub protocol_version: u32,
}

/// Welcome message sent by the hub after a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub hub_device_id: String,

    /// Server time for clock skew diagnostics.
    pub server_time: String,
}

/// A single change record on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Correlates the hub's answer with this request.
    pub request_id: String,

    pub item: SyncItem,
}

// =============================================================================
// Helper Functions
// =============================================================================

impl SyncMessage {
    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::Hello(_) => "Hello",
            SyncMessage::Welcome(_) => "Welcome",
            SyncMessage::Push(_) => "Push",
            SyncMessage::PushAccepted { .. } => "PushAccepted",
            SyncMessage::PushConflict { .. } => "PushConflict",
            SyncMessage::PushRejected { .. } => "PushRejected",
            SyncMessage::Ping { .. } => "Ping",
            SyncMessage::Pong { .. } => "Pong",
            SyncMessage::Error { .. } => "Error",
        }
    }

    /// Request id of a delivery answer, if this is one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SyncMessage::PushAccepted { request_id, .. }
            | SyncMessage::PushConflict { request_id, .. }
            | SyncMessage::PushRejected { request_id, .. } => Some(request_id),
            SyncMessage::Push(req) => Some(&req.request_id),
            _ => None,
        }
    }

    /// Creates a Hello message.
    pub fn hello(device_id: &str, device_name: &str) -> Self {
        SyncMessage::Hello(HelloPayload {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Creates a Push message.
    pub fn push(request_id: &str, item: &SyncItem) -> Self {
        SyncMessage::Push(PushRequest {
            request_id: request_id.to_string(),
            item: item.clone(),
        })
    }

    /// Creates a Ping message.
    pub fn ping() -> Self {
        SyncMessage::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates a Pong message.
    pub fn pong(ping_timestamp: &str) -> Self {
        SyncMessage::Pong {
            ping_timestamp: ping_timestamp.to_string(),
            pong_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates an Error message.
    pub fn error(code: &str, message: &str) -> Self {
        SyncMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use titan_core::{SyncOperation, ENTITY_PRODUCT};

    #[test]
    fn test_hello_wire_format() {
        let hello = SyncMessage::hello("dev-123", "Register 1");
        let json = hello.to_json().unwrap();
        assert!(json.contains("\"type\":\"Hello\""));
        assert!(json.contains("\"deviceId\":\"dev-123\""));
        assert!(json.contains(&format!("\"protocolVersion\":{PROTOCOL_VERSION}")));
    }

    #[test]
    fn test_push_carries_request_id() {
        let item = SyncItem::new(ENTITY_PRODUCT, "p1", SyncOperation::Create, json!({"a": 1}));
        let push = SyncMessage::push("req-1", &item);
        assert_eq!(push.request_id(), Some("req-1"));
        assert_eq!(push.type_name(), "Push");
    }

    #[test]
    fn test_parse_conflict_answer() {
        let raw = r#"{
            "type": "PushConflict",
            "payload": {
                "requestId": "req-9",
                "remote": {
                    "payload": {"price": 250},
                    "version": 7,
                    "timestamp": "2024-05-01T10:00:00Z"
                }
            }
        }"#;

        let msg = SyncMessage::from_json(raw).unwrap();
        assert_eq!(msg.request_id(), Some("req-9"));
        match msg {
            SyncMessage::PushConflict { remote, .. } => {
                assert_eq!(remote.version, 7);
                assert!(!remote.deleted);
            }
            other => panic!("expected PushConflict, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_rejected_defaults_to_terminal() {
        let raw = r#"{"type":"PushRejected","payload":{"requestId":"r","reason":"schema"}}"#;
        match SyncMessage::from_json(raw).unwrap() {
            SyncMessage::PushRejected { retryable, .. } => assert!(!retryable),
            other => panic!("unexpected {}", other.type_name()),
        }
    }

    #[test]
    fn test_error_message() {
        let error = SyncMessage::error("DEVICE_UNKNOWN", "Device is not registered");
        let json = error.to_json().unwrap();
        assert!(json.contains("DEVICE_UNKNOWN"));
        assert_eq!(SyncMessage::ping().request_id(), None);
    }
}
