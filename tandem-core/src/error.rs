use thiserror::Error;

/// Errors surfaced by the collaboration engine.
///
/// These are explicit results, not control flow: callers decide whether to
/// retry (version conflicts), request a snapshot (transform anomalies), or
/// drop the input (everything else).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("operation cannot be applied: {0}")]
    Apply(String),
    #[error("operation transform failed: {0}")]
    Transform(String),
    #[error("invalid cursor position: {0}")]
    InvalidCursorPosition(String),
    #[error("editor {0} is not initialized")]
    Disabled(String),
    #[error("invalid operation batch: {0}")]
    BatchValidation(String),
}
