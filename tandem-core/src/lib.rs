//! # tandem-core — Operational-transformation engine for tandem
//!
//! Deterministic per-document collaboration state: content, a monotonic
//! version counter, an append-only operation log, remote-cursor presence,
//! and debounced cursor broadcasts.
//!
//! ## Architecture
//!
//! ```text
//! Operation / OperationBatch
//!       │
//!       ▼
//! CollaborationEngine ── per editor_id ──┬── EditorState      (content)
//!       │                                ├── OperationHistory (log + version)
//!       │                                ├── CursorTracker    (presence)
//!       │                                └── EditorSnapshot   (capture)
//!       ▼
//!    EventBus (primitive-payload domain events)
//! ```
//!
//! Concurrent edits converge through the pure functions in [`transform`]:
//! an operation is rewritten against everything applied since its base
//! version, then spliced into the content buffer. Positions are flat char
//! offsets; `{line, column}` carets are presentational.
//!
//! ## Modules
//!
//! - [`operation`] — value types: operations, batches, carets, users, snapshots
//! - [`transform`] — pure OT transform / fold / compose / cursor math
//! - [`history`] — append-only log with version counter and range queries
//! - [`editor`] — content buffer, mode gate, undo/redo
//! - [`cursor`] — per-editor remote-user registry
//! - [`engine`] — the orchestrator and cursor-broadcast timers
//! - [`events`] — domain events and the `EventBus` seam

pub mod cursor;
pub mod editor;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod id;
pub mod operation;
pub mod transform;

pub use cursor::CursorTracker;
pub use editor::{EditorMode, EditorState};
pub use engine::{
    CollaborationEngine, CursorBroadcast, CursorSink, EngineConfig, CURSOR_BROADCAST_DEFAULT,
};
pub use error::EngineError;
pub use events::{CollabEvent, EventBus, LogEventBus};
pub use history::{HistorySnapshot, OperationHistory};
pub use operation::{
    Cursor, EditorSnapshot, Operation, OperationBatch, OperationType, RemoteUser, Selection,
    MAX_BATCH_SIZE,
};
pub use transform::{compose, transform, transform_against_many, transform_cursor};
