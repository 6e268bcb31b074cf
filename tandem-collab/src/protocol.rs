//! JSON wire protocol between clients and the session fabric.
//!
//! Inbound frame:
//! ```text
//! { "type": "operation" | "heartbeat" | "subscribe" | "unsubscribe",
//!   "sessionId": "…",          // must equal the server-assigned id
//!   "payload": { … }?,
//!   "timestamp": <ms>? }
//! ```
//!
//! Outbound frames are `connection`, `heartbeat`, and the broadcast frame
//! (`operation` | `notification`). All keys are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tandem_core::id::unix_millis;
use tandem_core::Operation;

use crate::error::FabricError;

/// Loose inbound shape; validation happens in [`ClientFrame::parse`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type", default)]
    frame_type: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    timestamp: Option<u64>,
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Operation {
        session_id: String,
        document_id: String,
        operation: Operation,
        version: u64,
        timestamp: Option<u64>,
    },
    Heartbeat {
        session_id: String,
        timestamp: Option<u64>,
    },
    Subscribe {
        session_id: String,
        document_id: String,
    },
    Unsubscribe {
        session_id: String,
        document_id: String,
    },
}

fn invalid(what: impl Into<String>) -> FabricError {
    FabricError::InvalidMessage(what.into())
}

fn document_id_of(payload: &Value) -> Result<String, FabricError> {
    payload
        .get("documentId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid("payload.documentId missing or empty"))
}

impl ClientFrame {
    /// Parse and validate a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, FabricError> {
        let frame: RawFrame =
            serde_json::from_str(raw).map_err(|err| invalid(format!("malformed JSON: {err}")))?;

        let frame_type = frame.frame_type.ok_or_else(|| invalid("missing type"))?;
        let session_id = frame
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| invalid("missing or empty sessionId"))?;

        match frame_type.as_str() {
            "heartbeat" => Ok(ClientFrame::Heartbeat {
                session_id,
                timestamp: frame.timestamp,
            }),
            "subscribe" | "unsubscribe" => {
                let payload = frame
                    .payload
                    .ok_or_else(|| invalid(format!("{frame_type} frame requires a payload")))?;
                let document_id = document_id_of(&payload)?;
                if frame_type == "subscribe" {
                    Ok(ClientFrame::Subscribe {
                        session_id,
                        document_id,
                    })
                } else {
                    Ok(ClientFrame::Unsubscribe {
                        session_id,
                        document_id,
                    })
                }
            }
            "operation" => {
                let payload = frame
                    .payload
                    .ok_or_else(|| invalid("operation frame requires a payload"))?;
                let document_id = document_id_of(&payload)?;
                let operation = payload
                    .get("operation")
                    .cloned()
                    .ok_or_else(|| invalid("payload.operation missing"))?;
                let operation: Operation = serde_json::from_value(operation)
                    .map_err(|err| invalid(format!("payload.operation malformed: {err}")))?;
                let version = payload
                    .get("version")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| invalid("payload.version missing"))?;
                if version < 1 {
                    return Err(invalid("payload.version must be >= 1"));
                }
                Ok(ClientFrame::Operation {
                    session_id,
                    document_id,
                    operation,
                    version,
                    timestamp: frame.timestamp,
                })
            }
            other => Err(invalid(format!("unknown frame type {other:?}"))),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ClientFrame::Operation { session_id, .. }
            | ClientFrame::Heartbeat { session_id, .. }
            | ClientFrame::Subscribe { session_id, .. }
            | ClientFrame::Unsubscribe { session_id, .. } => session_id,
        }
    }
}

/// Kind tag of an outbound broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastType {
    Operation,
    Notification,
}

/// A single logical message fanned out to a document's subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFrame {
    #[serde(rename = "type")]
    pub frame_type: BroadcastType,
    pub document_id: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_session_id: Option<String>,
    pub timestamp: u64,
}

impl BroadcastFrame {
    pub fn operation(
        document_id: impl Into<String>,
        data: Value,
        exclude_session_id: Option<String>,
    ) -> Self {
        Self {
            frame_type: BroadcastType::Operation,
            document_id: document_id.into(),
            data,
            exclude_session_id,
            timestamp: unix_millis(),
        }
    }

    pub fn notification(document_id: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: BroadcastType::Notification,
            document_id: document_id.into(),
            data,
            exclude_session_id: None,
            timestamp: unix_millis(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("broadcast frames serialize")
    }
}

/// Handshake acknowledgement carrying the server-assigned session id.
pub fn connection_frame(session_id: &str) -> String {
    json!({
        "type": "connection",
        "sessionId": session_id,
        "timestamp": unix_millis(),
    })
    .to_string()
}

/// Liveness probe sent on each heartbeat tick.
pub fn heartbeat_frame() -> String {
    json!({
        "type": "heartbeat",
        "timestamp": unix_millis(),
    })
    .to_string()
}
