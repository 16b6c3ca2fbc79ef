//! Wire protocol between session clients and the hub.
//!
//! JSON over websocket text frames:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┬───────────┐
//! │ type         │ fields                                   │ direction │
//! ├──────────────┼──────────────────────────────────────────┼───────────┤
//! │ sync-request │ senderId                                 │ c → hub   │
//! │ sync-response│ sessionId, documentState, isFirstUser    │ hub → c   │
//! │ change       │ senderId, changes                        │ either    │
//! │ presence     │ senderId, presence                       │ either    │
//! └──────────────┴──────────────────────────────────────────┴───────────┘
//! ```
//!
//! `documentState` and `changes` are CRDT byte blobs, serialized as JSON
//! arrays of unsigned bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use curveboard_core::Point;

use crate::presence::User;

/// Protocol errors. Parse failures discard the single offending message;
/// the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message serialization failed: {0}")]
    Serialize(serde_json::Error),
    #[error("message parse failed: {0}")]
    Parse(serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
}

/// Presence payloads fanned out by the hub without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PresencePayload {
    /// High-frequency cursor/selection update.
    #[serde(rename_all = "camelCase")]
    Cursor {
        user_id: String,
        cursor: Option<Point>,
        active_curve_id: Option<String>,
    },
    /// Full profile on join.
    #[serde(rename_all = "camelCase")]
    Join { user_id: String, user: User },
    /// Clean leave.
    #[serde(rename_all = "camelCase")]
    Leave { user_id: String },
}

impl PresencePayload {
    pub fn user_id(&self) -> &str {
        match self {
            PresencePayload::Cursor { user_id, .. }
            | PresencePayload::Join { user_id, .. }
            | PresencePayload::Leave { user_id } => user_id,
        }
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    #[serde(rename_all = "camelCase")]
    SyncRequest { sender_id: String },
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        session_id: String,
        document_state: Vec<u8>,
        is_first_user: bool,
    },
    #[serde(rename_all = "camelCase")]
    Change { sender_id: String, changes: Vec<u8> },
    #[serde(rename_all = "camelCase")]
    Presence {
        sender_id: String,
        presence: PresencePayload,
    },
}

impl WireMessage {
    pub fn sync_request(sender_id: impl Into<String>) -> Self {
        WireMessage::SyncRequest {
            sender_id: sender_id.into(),
        }
    }

    pub fn sync_response(
        session_id: impl Into<String>,
        document_state: Vec<u8>,
        is_first_user: bool,
    ) -> Self {
        WireMessage::SyncResponse {
            session_id: session_id.into(),
            document_state,
            is_first_user,
        }
    }

    pub fn change(sender_id: impl Into<String>, changes: Vec<u8>) -> Self {
        WireMessage::Change {
            sender_id: sender_id.into(),
            changes,
        }
    }

    pub fn presence(sender_id: impl Into<String>, presence: PresencePayload) -> Self {
        WireMessage::Presence {
            sender_id: sender_id.into(),
            presence,
        }
    }

    /// Sender id, where the message carries one.
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            WireMessage::SyncRequest { sender_id }
            | WireMessage::Change { sender_id, .. }
            | WireMessage::Presence { sender_id, .. } => Some(sender_id),
            WireMessage::SyncResponse { .. } => None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialize)
    }

    /// Parse from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_roundtrip() {
        let msg = WireMessage::sync_request("u1");
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.sender_id(), Some("u1"));
    }

    #[test]
    fn test_sync_response_roundtrip() {
        let msg = WireMessage::sync_response("default", vec![1, 2, 3], true);
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            WireMessage::SyncResponse {
                session_id,
                document_state,
                is_first_user,
            } => {
                assert_eq!(session_id, "default");
                assert_eq!(document_state, vec![1, 2, 3]);
                assert!(is_first_user);
            }
            other => panic!("expected sync-response, got {other:?}"),
        }
    }

    #[test]
    fn test_change_roundtrip() {
        let msg = WireMessage::change("u1", vec![0, 255, 17]);
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_presence_roundtrip() {
        let msg = WireMessage::presence(
            "u1",
            PresencePayload::Cursor {
                user_id: "u1".to_string(),
                cursor: Some(Point::new(4.0, 5.0)),
                active_curve_id: None,
            },
        );
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_wire_field_names() {
        let msg = WireMessage::sync_response("default", vec![7], false);
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "sync-response");
        assert_eq!(json["sessionId"], "default");
        assert_eq!(json["documentState"][0], 7);
        assert_eq!(json["isFirstUser"], false);

        let msg = WireMessage::sync_request("u1");
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "sync-request");
        assert_eq!(json["senderId"], "u1");
    }

    #[test]
    fn test_blob_bytes_survive_as_json_numbers() {
        let blob: Vec<u8> = (0..=255).collect();
        let msg = WireMessage::change("u1", blob.clone());
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            WireMessage::Change { changes, .. } => assert_eq!(changes, blob),
            other => panic!("expected change, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(WireMessage::decode("{not json").is_err());
        assert!(WireMessage::decode(r#"{"type":"unknown-kind"}"#).is_err());
    }
}
