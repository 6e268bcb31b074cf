//! Pure operational-transformation functions.
//!
//! `transform(op, against)` rewrites `op` into the form it would have taken
//! had `against` already been applied, so that two sites applying the pair in
//! opposite orders converge on the same content (TP1).
//!
//! Concurrent inserts at the same position are ordered by `client_id`: the
//! lexicographically smaller id keeps its position, the other shifts right.
//! Both sides of a deployment must use this exact comparison.
//!
//! Reference: Ellis & Gibbs, "Concurrency Control in Groupware Systems" (1989)

use crate::error::EngineError;
use crate::operation::{Cursor, Operation, OperationType};

fn anomaly(op: &Operation, what: &str) -> EngineError {
    EngineError::Transform(format!("arithmetic anomaly on op {}: {what}", op.id))
}

/// Transform `op` against a single concurrent `against` operation.
pub fn transform(op: &Operation, against: &Operation) -> Result<Operation, EngineError> {
    let mut out = op.clone();
    match (op.op_type, against.op_type) {
        (OperationType::Insert, OperationType::Insert) => {
            let keeps_position = op.position < against.position
                || (op.position == against.position && op.client_id < against.client_id);
            if !keeps_position {
                out.position = op
                    .position
                    .checked_add(against.unit_len())
                    .ok_or_else(|| anomaly(op, "insert shift overflow"))?;
            }
        }
        (OperationType::Insert, OperationType::Delete) => {
            let against_end = against
                .position
                .checked_add(against.length)
                .ok_or_else(|| anomaly(op, "delete span overflow"))?;
            if op.position <= against.position {
                // unchanged
            } else if op.position >= against_end {
                out.position = op
                    .position
                    .checked_sub(against.length)
                    .ok_or_else(|| anomaly(op, "insert shift underflow"))?;
            } else {
                // Inside the deleted range: clamp to its start.
                out.position = against.position;
            }
        }
        (OperationType::Delete, OperationType::Insert) => {
            let op_end = op
                .position
                .checked_add(op.length)
                .ok_or_else(|| anomaly(op, "delete span overflow"))?;
            let ins_len = against.unit_len();
            if op_end <= against.position {
                // unchanged
            } else if op.position >= against.position {
                out.position = op
                    .position
                    .checked_add(ins_len)
                    .ok_or_else(|| anomaly(op, "delete shift overflow"))?;
            } else {
                // Insert landed inside the deleted span: widen to cover it.
                out.length = op
                    .length
                    .checked_add(ins_len)
                    .ok_or_else(|| anomaly(op, "delete extend overflow"))?;
            }
        }
        (OperationType::Delete, OperationType::Delete) => {
            let op_start = op.position;
            let op_end = op
                .position
                .checked_add(op.length)
                .ok_or_else(|| anomaly(op, "delete span overflow"))?;
            let against_end = against
                .position
                .checked_add(against.length)
                .ok_or_else(|| anomaly(op, "delete span overflow"))?;

            if op_end <= against.position {
                // Disjoint, op before: unchanged.
            } else if op_start >= against_end {
                out.position = op_start
                    .checked_sub(against.length)
                    .ok_or_else(|| anomaly(op, "delete shift underflow"))?;
            } else if op_start <= against.position && op_end >= against_end {
                // Op fully contains against.
                out.length = op
                    .length
                    .checked_sub(against.length)
                    .ok_or_else(|| anomaly(op, "contained trim underflow"))?;
            } else if op_start >= against.position && op_end <= against_end {
                // Op fully contained in against: becomes a no-op.
                out.position = against.position;
                out.length = 0;
            } else if op_start < against.position {
                // Left overlap: op starts before against, ends inside it.
                let overlap = op_end
                    .checked_sub(against.position)
                    .ok_or_else(|| anomaly(op, "left overlap underflow"))?;
                out.length = op
                    .length
                    .checked_sub(overlap)
                    .ok_or_else(|| anomaly(op, "left overlap trim underflow"))?;
            } else {
                // Right overlap: op starts inside against, ends after it.
                let overlap = against_end
                    .checked_sub(op_start)
                    .ok_or_else(|| anomaly(op, "right overlap underflow"))?;
                out.position = against.position;
                out.length = op
                    .length
                    .checked_sub(overlap)
                    .ok_or_else(|| anomaly(op, "right overlap trim underflow"))?;
            }
        }
    }
    Ok(out)
}

/// Fold `transform` over `against` left-to-right.
///
/// Entries sharing `op.client_id` are skipped: an author's own ops are
/// already reflected in the positions it produced, so transforming against
/// them must be the identity.
pub fn transform_against_many(
    op: &Operation,
    against: &[Operation],
) -> Result<Operation, EngineError> {
    let mut out = op.clone();
    for other in against {
        if other.client_id == op.client_id {
            continue;
        }
        out = transform(&out, other)?;
    }
    Ok(out)
}

/// Best-effort merge of two adjacent ops from the same client, e.g. two
/// keystrokes. Returns `None` whenever the pair is not trivially mergeable;
/// callers fall back to keeping both ops.
pub fn compose(a: &Operation, b: &Operation) -> Option<Operation> {
    if a.client_id != b.client_id {
        return None;
    }
    match (a.op_type, b.op_type) {
        (OperationType::Insert, OperationType::Insert) => {
            if b.position == a.position + a.unit_len() {
                let mut merged = a.clone();
                let mut content = a.content.clone().unwrap_or_default();
                content.push_str(b.content.as_deref().unwrap_or_default());
                merged.content = Some(content);
                Some(merged)
            } else {
                None
            }
        }
        (OperationType::Delete, OperationType::Delete) => {
            if b.position == a.position {
                // Forward deletes at a fixed point.
                let mut merged = a.clone();
                merged.length = a.length + b.length;
                Some(merged)
            } else if b.position + b.length == a.position {
                // Backspace run.
                let mut merged = a.clone();
                merged.position = b.position;
                merged.length = a.length + b.length;
                Some(merged)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Transform a presentational cursor against an operation.
///
/// Only `column` is adjusted, as if the document were a single line; `line`
/// passes through untouched. Multi-line placement is a client rendering
/// concern.
pub fn transform_cursor(cursor: Cursor, op: &Operation) -> Cursor {
    let mut out = cursor;
    match op.op_type {
        OperationType::Insert => {
            if cursor.column >= op.position {
                out.column = cursor.column.saturating_add(op.unit_len());
            }
        }
        OperationType::Delete => {
            let end = op.position.saturating_add(op.length);
            if cursor.column <= op.position {
                // unchanged
            } else if cursor.column >= end {
                out.column = cursor.column - op.length;
            } else {
                out.column = op.position;
            }
        }
    }
    out
}
