//! Editor content buffer with mode gating and undo/redo stacks.
//!
//! All offsets are char offsets; splicing converts to byte positions at the
//! last moment so multi-byte text never lands inside a code point.

use crate::error::EngineError;
use crate::operation::{Operation, OperationType};

/// Gate on whether local mutation is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditorMode {
    #[default]
    Active,
    ReadOnly,
    Disconnected,
}

#[derive(Debug, Default)]
pub struct EditorState {
    content: String,
    version: u64,
    mode: EditorMode,
    undo_stack: Vec<Operation>,
    redo_stack: Vec<Operation>,
}

/// Byte index of the `char_pos`-th char, or `None` past the end.
fn byte_offset(content: &str, char_pos: usize) -> Option<usize> {
    if char_pos == 0 {
        return Some(0);
    }
    content
        .char_indices()
        .nth(char_pos)
        .map(|(byte, _)| byte)
        .or_else(|| (char_pos == content.chars().count()).then_some(content.len()))
}

impl EditorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    /// Mode transitions are unrestricted.
    pub fn set_mode(&mut self, mode: EditorMode) {
        self.mode = mode;
    }

    /// Apply one operation: gate on mode, bounds-check, splice, record the
    /// inverse for undo, clear redo, advance the version.
    pub fn apply(&mut self, op: &Operation) -> Result<(), EngineError> {
        match self.mode {
            EditorMode::Disconnected => {
                return Err(EngineError::Apply("editor is disconnected".into()))
            }
            EditorMode::ReadOnly => {
                return Err(EngineError::Apply("editor is read-only".into()))
            }
            EditorMode::Active => {}
        }

        let inverse = self.splice(op)?;
        self.undo_stack.push(inverse);
        self.redo_stack.clear();
        self.version = self.version.max(op.version + 1);
        Ok(())
    }

    /// Validate and perform the content mutation, returning the inverse op.
    fn splice(&mut self, op: &Operation) -> Result<Operation, EngineError> {
        let char_len = self.char_len();
        match op.op_type {
            OperationType::Insert => {
                if op.position > char_len {
                    return Err(EngineError::InvalidCursorPosition(format!(
                        "insert at {} exceeds content length {char_len}",
                        op.position
                    )));
                }
                let text = op.content.as_deref().unwrap_or_default();
                let at = byte_offset(&self.content, op.position)
                    .expect("validated insert position");
                self.content.insert_str(at, text);
                Ok(Operation::delete(
                    op.position,
                    text.chars().count(),
                    &op.client_id,
                    op.version,
                ))
            }
            OperationType::Delete => {
                let end = op.position + op.length;
                if end > char_len {
                    return Err(EngineError::InvalidCursorPosition(format!(
                        "delete [{}, {end}) exceeds content length {char_len}",
                        op.position
                    )));
                }
                let start_byte = byte_offset(&self.content, op.position)
                    .expect("validated delete start");
                let end_byte = byte_offset(&self.content, end).expect("validated delete end");
                let removed: String = self.content[start_byte..end_byte].to_string();
                self.content.replace_range(start_byte..end_byte, "");
                Ok(Operation::insert(
                    op.position,
                    removed,
                    &op.client_id,
                    op.version,
                ))
            }
        }
    }

    /// Revert the most recent edit. Content-only: the version counter and
    /// any external history are untouched. Returns the op that was applied.
    pub fn undo(&mut self) -> Option<Operation> {
        let inverse = self.undo_stack.pop()?;
        let redo = self
            .splice(&inverse)
            .expect("undo inverse always fits current content");
        self.redo_stack.push(redo);
        Some(inverse)
    }

    /// Reapply the most recently undone edit.
    pub fn redo(&mut self) -> Option<Operation> {
        let op = self.redo_stack.pop()?;
        let undo = self
            .splice(&op)
            .expect("redo op always fits current content");
        self.undo_stack.push(undo);
        Some(op)
    }

    /// Replace the buffer wholesale, wiping version and both stacks.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.version = 0;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Back to initial state: active, empty, version 0.
    pub fn reset(&mut self) {
        self.content.clear();
        self.version = 0;
        self.mode = EditorMode::Active;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
