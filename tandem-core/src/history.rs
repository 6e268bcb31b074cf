//! Append-only operation log with a monotonic version counter.

use serde::{Deserialize, Serialize};

use crate::id::unix_millis;
use crate::operation::Operation;

/// Deep-copied capture of the log at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub operations: Vec<Operation>,
    pub version: u64,
    pub timestamp: u64,
}

/// Per-editor operation log.
///
/// The version counter equals the number of applied operations as long as
/// callers uphold the append contract: `op.version == self.version()` at
/// append time. The structure does not re-check it.
#[derive(Debug, Default, Clone)]
pub struct OperationHistory {
    operations: Vec<Operation>,
    version: u64,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Push an op and advance the counter to `op.version + 1`.
    pub fn append(&mut self, op: Operation) {
        self.version = self.version.max(op.version + 1);
        self.operations.push(op);
    }

    /// Ops with `version >= v`, oldest first.
    pub fn since_version(&self, v: u64) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.version >= v)
            .cloned()
            .collect()
    }

    /// Ops with `from <= version < to`.
    pub fn between(&self, from: u64, to: u64) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.version >= from && op.version < to)
            .cloned()
            .collect()
    }

    /// Every op authored by `client_id`, oldest first.
    pub fn by_client(&self, client_id: &str) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.client_id == client_id)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            operations: self.operations.clone(),
            version: self.version,
            timestamp: unix_millis(),
        }
    }

    /// Recovery hook for server-authoritative reordering: keep ops below
    /// `from_version`, splice in `new_ops`, and jump the counter to
    /// `to_version`.
    pub fn rebase(&mut self, from_version: u64, to_version: u64, new_ops: Vec<Operation>) {
        self.operations.retain(|op| op.version < from_version);
        self.operations.extend(new_ops);
        self.version = to_version;
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.version = 0;
    }
}
