//! Value types shared by the engine and the session fabric.
//!
//! Positions are flat offsets counted in Unicode scalar values (chars), not
//! bytes. `Cursor { line, column }` is presentational: the transform math
//! treats every point as if the whole document were line 0, so `column` is
//! the only coordinate it adjusts.

use serde::{Deserialize, Serialize};

use crate::id::{sortable_id, unix_millis};

/// Upper bound on operations per batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// The two edit primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Delete,
}

/// The atomic edit unit.
///
/// `version` is the history version the author observed when producing the
/// op (its base version). `timestamp` is informational only and never used
/// for ordering; `client_id` is the deterministic tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Char offset into the document.
    pub position: usize,
    /// Inserted text; `None` for deletes.
    #[serde(default)]
    pub content: Option<String>,
    /// Deleted span in chars; 0 for inserts.
    #[serde(default)]
    pub length: usize,
    pub client_id: String,
    pub timestamp: u64,
    pub version: u64,
}

impl Operation {
    pub fn insert(
        position: usize,
        content: impl Into<String>,
        client_id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            id: sortable_id(),
            op_type: OperationType::Insert,
            position,
            content: Some(content.into()),
            length: 0,
            client_id: client_id.into(),
            timestamp: unix_millis(),
            version,
        }
    }

    pub fn delete(
        position: usize,
        length: usize,
        client_id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            id: sortable_id(),
            op_type: OperationType::Delete,
            position,
            content: None,
            length,
            client_id: client_id.into(),
            timestamp: unix_millis(),
            version,
        }
    }

    /// Length of the inserted text in chars; 0 for deletes.
    pub fn unit_len(&self) -> usize {
        match self.op_type {
            OperationType::Insert => self
                .content
                .as_deref()
                .map(|c| c.chars().count())
                .unwrap_or(0),
            OperationType::Delete => 0,
        }
    }

    /// Whether the op changes any content when applied.
    pub fn has_effect(&self) -> bool {
        match self.op_type {
            OperationType::Insert => self.unit_len() > 0,
            OperationType::Delete => self.length > 0,
        }
    }
}

/// Ordered sequence of operations sharing one base version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBatch {
    pub id: String,
    pub client_id: String,
    pub base_version: u64,
    pub operations: Vec<Operation>,
}

impl OperationBatch {
    pub fn new(client_id: impl Into<String>, base_version: u64, operations: Vec<Operation>) -> Self {
        Self {
            id: sortable_id(),
            client_id: client_id.into(),
            base_version,
            operations,
        }
    }
}

/// A presentational caret position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub line: usize,
    pub column: usize,
}

impl Cursor {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A presentational selection span between two carets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub start: Cursor,
    pub end: Cursor,
}

impl Selection {
    pub fn new(start: Cursor, end: Cursor) -> Self {
        Self { start, end }
    }
}

/// A remote participant as tracked per editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    pub name: String,
    /// `#RRGGBB` cursor color.
    pub color: String,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub selection: Option<Selection>,
    pub is_active: bool,
    pub last_seen: u64,
}

impl RemoteUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        let id = id.into();
        let color = color.into();
        let color = if is_valid_color(&color) {
            color
        } else {
            stable_color(&id)
        };
        Self {
            id,
            name: name.into(),
            color,
            cursor: None,
            selection: None,
            is_active: true,
            last_seen: unix_millis(),
        }
    }
}

fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Stable `#RRGGBB` color derived from the user id hash, so a user keeps the
/// same color across reconnects even when the client omits one.
fn stable_color(id: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let r = (hash & 0xff) as u8;
    let g = ((hash >> 8) & 0xff) as u8;
    let b = ((hash >> 16) & 0xff) as u8;
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Point-in-time content + version capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub id: String,
    pub content: String,
    pub version: u64,
    pub timestamp: u64,
    pub client_id: String,
}
