//! Engine orchestrating per-editor state, history, presence, and broadcasts.
//!
//! ```text
//! apply_operation(editor, op)
//!       │
//!       ▼
//! ┌──────────────── CollaborationEngine ────────────────┐
//! │ editors: editor_id → EditorState + OperationHistory │
//! │                      + CursorTracker + Snapshot     │
//! │ timers:  (editor_id, user_id) → pending broadcast   │
//! └───────────┬─────────────────────────────────────────┘
//!             ▼
//!          EventBus (synchronous, state-change order)
//! ```
//!
//! All mutation goes through one `RwLock` write guard, so operations form a
//! total order per editor, observable through the monotonically increasing
//! version counter. Cursor-broadcast timers fire on the runtime's timer
//! wheel and re-acquire the timer table before touching shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cursor::CursorTracker;
use crate::editor::{EditorMode, EditorState};
use crate::error::EngineError;
use crate::events::{CollabEvent, EventBus};
use crate::history::OperationHistory;
use crate::id::{sortable_id, unix_millis};
use crate::operation::{
    Cursor, EditorSnapshot, Operation, OperationBatch, RemoteUser, Selection, MAX_BATCH_SIZE,
};
use crate::transform::transform_against_many;

/// Debounce window for cursor broadcasts.
pub const CURSOR_BROADCAST_DEFAULT: Duration = Duration::from_millis(75);
const CURSOR_BROADCAST_MIN: Duration = Duration::from_millis(50);
const CURSOR_BROADCAST_MAX: Duration = Duration::from_millis(100);

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cursor-broadcast debounce interval; clamped to `[50, 100]` ms.
    pub cursor_broadcast_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cursor_broadcast_interval: CURSOR_BROADCAST_DEFAULT,
        }
    }
}

impl EngineConfig {
    fn clamped_interval(&self) -> Duration {
        self.cursor_broadcast_interval
            .clamp(CURSOR_BROADCAST_MIN, CURSOR_BROADCAST_MAX)
    }
}

/// Payload handed to the cursor-broadcast callback when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorBroadcast {
    pub id: String,
    pub editor_id: String,
    pub user_id: String,
    pub cursor: Option<Cursor>,
    pub selection: Option<Selection>,
    pub timestamp: u64,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// User-supplied broadcast sink. Failures are logged, never propagated.
pub type CursorSink = Arc<dyn Fn(CursorBroadcast) -> Result<(), BoxError> + Send + Sync>;

#[derive(Default)]
struct EditorEntry {
    state: EditorState,
    history: OperationHistory,
    tracker: CursorTracker,
    snapshot: Option<EditorSnapshot>,
}

type TimerKey = (String, String);

struct PendingBroadcast {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Orchestrates the collaboration state for any number of editors.
pub struct CollaborationEngine {
    editors: RwLock<HashMap<String, EditorEntry>>,
    timers: Arc<Mutex<HashMap<TimerKey, PendingBroadcast>>>,
    generation: AtomicU64,
    bus: Arc<dyn EventBus>,
    interval: Duration,
}

impl CollaborationEngine {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_config(bus, EngineConfig::default())
    }

    pub fn with_config(bus: Arc<dyn EventBus>, config: EngineConfig) -> Self {
        Self {
            editors: RwLock::new(HashMap::new()),
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            bus,
            interval: config.clamped_interval(),
        }
    }

    /// Lazily create an editor. Re-initialization is a no-op so racing
    /// clients cannot clobber live state.
    pub async fn initialize_editor(&self, editor_id: &str, content: Option<&str>) {
        let mut editors = self.editors.write().await;
        editors.entry(editor_id.to_string()).or_insert_with(|| {
            log::debug!("initializing editor {editor_id}");
            EditorEntry {
                state: EditorState::with_content(content.unwrap_or_default()),
                ..EditorEntry::default()
            }
        });
    }

    pub async fn contains_editor(&self, editor_id: &str) -> bool {
        self.editors.read().await.contains_key(editor_id)
    }

    /// Apply one operation at the editor's current version.
    pub async fn apply_operation(
        &self,
        editor_id: &str,
        op: Operation,
    ) -> Result<u64, EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;
        let version = Self::apply_one(entry, editor_id, op, &*self.bus)?;
        Ok(version)
    }

    /// Shared apply path: mode gate, version gate, splice, caret shift,
    /// history append, event.
    fn apply_one(
        entry: &mut EditorEntry,
        editor_id: &str,
        op: Operation,
        bus: &dyn EventBus,
    ) -> Result<u64, EngineError> {
        if entry.state.mode() != EditorMode::Active {
            return Err(EngineError::Apply(format!(
                "editor {editor_id} is not active"
            )));
        }
        let expected = entry.history.version();
        if op.version != expected {
            return Err(EngineError::VersionConflict {
                expected,
                actual: op.version,
            });
        }
        entry.state.apply(&op)?;
        entry.tracker.transform_all(&op);
        bus.publish(CollabEvent::OperationApplied {
            editor_id: editor_id.to_string(),
            operation_id: op.id.clone(),
            client_id: op.client_id.clone(),
            version: op.version + 1,
            timestamp: unix_millis(),
        });
        entry.history.append(op);
        Ok(entry.history.version())
    }

    /// Apply a batch in order against a common base version.
    ///
    /// Size and base version are validated before anything mutates; a
    /// mid-batch failure leaves the earlier ops applied (no rollback). The
    /// batch event fires only after every op succeeded.
    pub async fn apply_batch(
        &self,
        editor_id: &str,
        batch: OperationBatch,
    ) -> Result<u64, EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;

        let count = batch.operations.len();
        if count == 0 || count > MAX_BATCH_SIZE {
            return Err(EngineError::BatchValidation(format!(
                "batch size {count} outside [1, {MAX_BATCH_SIZE}]"
            )));
        }
        let expected = entry.history.version();
        if batch.base_version != expected {
            return Err(EngineError::VersionConflict {
                expected,
                actual: batch.base_version,
            });
        }

        for mut op in batch.operations {
            // Server-authoritative sequencing within the batch.
            op.version = entry.history.version();
            Self::apply_one(entry, editor_id, op, &*self.bus)?;
        }

        self.bus.publish(CollabEvent::OperationBatchReceived {
            editor_id: editor_id.to_string(),
            batch_id: batch.id,
            client_id: batch.client_id,
            operation_count: count,
            base_version: batch.base_version,
            timestamp: unix_millis(),
        });
        Ok(entry.history.version())
    }

    /// Rewrite `op` against concurrent operations, skipping the author's
    /// own. Emits a conflict event whenever the result differs from the
    /// input in position, length, or content.
    pub async fn transform_operation(
        &self,
        editor_id: &str,
        op: &Operation,
        against: &[Operation],
    ) -> Result<Operation, EngineError> {
        let transformed = transform_against_many(op, against)?;
        let changed = transformed.position != op.position
            || transformed.length != op.length
            || transformed.content != op.content;
        if changed {
            self.bus.publish(CollabEvent::OperationConflict {
                editor_id: editor_id.to_string(),
                operation_id: op.id.clone(),
                client_id: op.client_id.clone(),
                original_position: op.position,
                transformed_position: transformed.position,
                timestamp: unix_millis(),
            });
        }
        Ok(transformed)
    }

    pub async fn add_remote_user(
        &self,
        editor_id: &str,
        user: RemoteUser,
    ) -> Result<(), EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;
        self.bus.publish(CollabEvent::RemoteUserConnected {
            editor_id: editor_id.to_string(),
            user_id: user.id.clone(),
            name: user.name.clone(),
            timestamp: unix_millis(),
        });
        entry.tracker.add_user(user);
        Ok(())
    }

    pub async fn remove_remote_user(
        &self,
        editor_id: &str,
        user_id: &str,
    ) -> Result<Option<RemoteUser>, EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;
        let removed = entry.tracker.remove_user(user_id);
        if removed.is_some() {
            self.bus.publish(CollabEvent::RemoteUserDisconnected {
                editor_id: editor_id.to_string(),
                user_id: user_id.to_string(),
                timestamp: unix_millis(),
            });
        }
        Ok(removed)
    }

    /// Update a tracked user's caret after bounds validation. Unknown users
    /// are a tolerated no-op; the return value says whether anything moved.
    pub async fn update_remote_user_cursor(
        &self,
        editor_id: &str,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
    ) -> Result<bool, EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;

        let limit = entry.state.char_len();
        let check = |point: &Cursor| -> Result<(), EngineError> {
            if point.column > limit {
                return Err(EngineError::InvalidCursorPosition(format!(
                    "column {} exceeds content length {limit}",
                    point.column
                )));
            }
            Ok(())
        };
        if let Some(ref c) = cursor {
            check(c)?;
        }
        if let Some(ref s) = selection {
            check(&s.start)?;
            check(&s.end)?;
        }

        let updated = entry.tracker.update_cursor(user_id, cursor, selection);
        if updated {
            self.bus.publish(CollabEvent::CursorUpdated {
                editor_id: editor_id.to_string(),
                user_id: user_id.to_string(),
                cursor,
                selection,
                timestamp: unix_millis(),
            });
        }
        Ok(updated)
    }

    /// Capture content + version and store it as the editor's current
    /// snapshot, replacing any previous one.
    pub async fn create_snapshot(
        &self,
        editor_id: &str,
        client_id: &str,
    ) -> Result<EditorSnapshot, EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;
        let snapshot = EditorSnapshot {
            id: sortable_id(),
            content: entry.state.content().to_string(),
            version: entry.history.version(),
            timestamp: unix_millis(),
            client_id: client_id.to_string(),
        };
        entry.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn snapshot(&self, editor_id: &str) -> Option<EditorSnapshot> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .and_then(|entry| entry.snapshot.clone())
    }

    /// Debounced cursor broadcast: any pending timer for `(editor, user)` is
    /// replaced, so a burst of calls produces one callback, one interval
    /// after the last call. Callback errors are logged and swallowed.
    pub async fn schedule_cursor_broadcast(
        &self,
        editor_id: &str,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
        sink: CursorSink,
    ) {
        let key: TimerKey = (editor_id.to_string(), user_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let interval = self.interval;
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let mut table = timers.lock().await;
                match table.get(&task_key) {
                    Some(pending) if pending.generation == generation => {
                        table.remove(&task_key);
                    }
                    // Superseded or cleared: someone else owns the key now.
                    _ => return,
                }
            }
            let broadcast = CursorBroadcast {
                id: sortable_id(),
                editor_id: task_key.0.clone(),
                user_id: task_key.1.clone(),
                cursor,
                selection,
                timestamp: unix_millis(),
            };
            if let Err(err) = sink(broadcast) {
                log::warn!(
                    "cursor broadcast callback failed for {}:{}: {err}",
                    task_key.0,
                    task_key.1
                );
            }
        });

        let mut table = self.timers.lock().await;
        if let Some(previous) = table.insert(key, PendingBroadcast { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel a pending broadcast, if any.
    pub async fn clear_cursor_broadcast(&self, editor_id: &str, user_id: &str) {
        let key = (editor_id.to_string(), user_id.to_string());
        if let Some(pending) = self.timers.lock().await.remove(&key) {
            pending.handle.abort();
        }
    }

    /// Pending broadcast timers for one editor.
    pub async fn pending_broadcasts(&self, editor_id: &str) -> usize {
        self.timers
            .lock()
            .await
            .keys()
            .filter(|(editor, _)| editor == editor_id)
            .count()
    }

    /// Clear content, history, presence, snapshot, and every pending timer
    /// belonging to the editor.
    pub async fn reset(&self, editor_id: &str) {
        {
            let mut editors = self.editors.write().await;
            if let Some(entry) = editors.get_mut(editor_id) {
                entry.state.reset();
                entry.history.clear();
                entry.tracker.clear();
                entry.snapshot = None;
            }
        }
        let mut table = self.timers.lock().await;
        let stale: Vec<TimerKey> = table
            .keys()
            .filter(|(editor, _)| editor == editor_id)
            .cloned()
            .collect();
        for key in stale {
            if let Some(pending) = table.remove(&key) {
                pending.handle.abort();
            }
        }
    }

    pub async fn editor_content(&self, editor_id: &str) -> Option<String> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.state.content().to_string())
    }

    pub async fn editor_version(&self, editor_id: &str) -> Option<u64> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.history.version())
    }

    pub async fn editor_mode(&self, editor_id: &str) -> Option<EditorMode> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.state.mode())
    }

    pub async fn set_editor_mode(
        &self,
        editor_id: &str,
        mode: EditorMode,
    ) -> Result<(), EngineError> {
        let mut editors = self.editors.write().await;
        let entry = editors
            .get_mut(editor_id)
            .ok_or_else(|| EngineError::Disabled(editor_id.to_string()))?;
        entry.state.set_mode(mode);
        Ok(())
    }

    pub async fn remote_users(&self, editor_id: &str) -> Vec<RemoteUser> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.tracker.users())
            .unwrap_or_default()
    }

    pub async fn active_remote_users(&self, editor_id: &str) -> Vec<RemoteUser> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.tracker.active_users())
            .unwrap_or_default()
    }

    pub async fn history_since(&self, editor_id: &str, version: u64) -> Vec<Operation> {
        self.editors
            .read()
            .await
            .get(editor_id)
            .map(|entry| entry.history.since_version(version))
            .unwrap_or_default()
    }

    /// Local undo: reverts the latest splice without touching the version
    /// counter or operation log. Returns the op that was applied.
    pub async fn undo(&self, editor_id: &str) -> Option<Operation> {
        self.editors.write().await.get_mut(editor_id)?.state.undo()
    }

    /// Local redo, counterpart to [`Self::undo`].
    pub async fn redo(&self, editor_id: &str) -> Option<Operation> {
        self.editors.write().await.get_mut(editor_id)?.state.redo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingBus;
    use std::sync::atomic::AtomicUsize;

    fn engine_with_bus() -> (CollaborationEngine, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        (CollaborationEngine::new(bus.clone()), bus)
    }

    fn counting_sink() -> (CursorSink, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let captured = count.clone();
        let sink: CursorSink = Arc::new(move |_broadcast| {
            captured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (sink, count)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        engine.initialize_editor("doc", Some("clobbered?")).await;
        assert_eq!(engine.editor_content("doc").await.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_apply_operation_mutates_and_emits() {
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        let version = engine
            .apply_operation("doc", Operation::insert(5, " World", "c1", 0))
            .await
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(
            engine.editor_content("doc").await.as_deref(),
            Some("Hello World")
        );
        assert!(matches!(
            bus.events()[0],
            CollabEvent::OperationApplied { version: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_on_unknown_editor_is_disabled() {
        let (engine, _) = engine_with_bus();
        let err = engine
            .apply_operation("ghost", Operation::insert(0, "x", "c1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Disabled(_)));
    }

    #[tokio::test]
    async fn test_apply_version_conflict() {
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", None).await;
        let err = engine
            .apply_operation("doc", Operation::insert(0, "x", "c1", 3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::VersionConflict {
                expected: 0,
                actual: 3
            }
        );
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_apply_gated_by_mode() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("ab")).await;
        engine
            .set_editor_mode("doc", EditorMode::ReadOnly)
            .await
            .unwrap();
        let err = engine
            .apply_operation("doc", Operation::insert(0, "x", "c1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Apply(_)));
    }

    #[tokio::test]
    async fn test_apply_shifts_tracked_cursors() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        engine
            .add_remote_user("doc", RemoteUser::new("u1", "Alice", "#112233"))
            .await
            .unwrap();
        engine
            .update_remote_user_cursor("doc", "u1", Some(Cursor::new(0, 5)), None)
            .await
            .unwrap();
        engine
            .apply_operation("doc", Operation::insert(0, ">> ", "c1", 0))
            .await
            .unwrap();
        let users = engine.remote_users("doc").await;
        assert_eq!(users[0].cursor, Some(Cursor::new(0, 8)));
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        // S5: empty doc, batch of two inserts at base 0.
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", None).await;
        let batch = OperationBatch::new(
            "c1",
            0,
            vec![
                Operation::insert(0, "ABC", "c1", 0),
                Operation::insert(3, "DEF", "c1", 0),
            ],
        );
        let version = engine.apply_batch("doc", batch).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(engine.editor_content("doc").await.as_deref(), Some("ABCDEF"));

        let events = bus.events();
        let batch_events: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, CollabEvent::OperationBatchReceived { .. }))
            .collect();
        assert_eq!(batch_events.len(), 1);
        assert!(matches!(
            batch_events[0],
            CollabEvent::OperationBatchReceived {
                operation_count: 2,
                base_version: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_batch_size_validated_before_apply() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", None).await;

        let empty = OperationBatch::new("c1", 0, vec![]);
        assert!(matches!(
            engine.apply_batch("doc", empty).await.unwrap_err(),
            EngineError::BatchValidation(_)
        ));

        let oversized = OperationBatch::new(
            "c1",
            0,
            (0..101)
                .map(|_| Operation::insert(0, "x", "c1", 0))
                .collect(),
        );
        assert!(matches!(
            engine.apply_batch("doc", oversized).await.unwrap_err(),
            EngineError::BatchValidation(_)
        ));
        assert_eq!(engine.editor_version("doc").await, Some(0));
    }

    #[tokio::test]
    async fn test_batch_base_version_conflict() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", None).await;
        let batch = OperationBatch::new("c1", 5, vec![Operation::insert(0, "x", "c1", 5)]);
        assert!(matches!(
            engine.apply_batch("doc", batch).await.unwrap_err(),
            EngineError::VersionConflict { expected: 0, actual: 5 }
        ));
    }

    #[tokio::test]
    async fn test_batch_failure_keeps_prior_ops() {
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", None).await;
        let batch = OperationBatch::new(
            "c1",
            0,
            vec![
                Operation::insert(0, "ok", "c1", 0),
                Operation::delete(10, 5, "c1", 0),
            ],
        );
        let err = engine.apply_batch("doc", batch).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursorPosition(_)));
        // Non-atomic: the first op stays applied, no batch event fires.
        assert_eq!(engine.editor_content("doc").await.as_deref(), Some("ok"));
        assert_eq!(engine.editor_version("doc").await, Some(1));
        assert!(!bus
            .events()
            .iter()
            .any(|event| matches!(event, CollabEvent::OperationBatchReceived { .. })));
    }

    #[tokio::test]
    async fn test_transform_emits_conflict_only_on_change() {
        let (engine, bus) = engine_with_bus();
        let op = Operation::insert(5, "x", "c1", 0);
        let concurrent = vec![Operation::insert(0, "abc", "c2", 0)];

        let transformed = engine
            .transform_operation("doc", &op, &concurrent)
            .await
            .unwrap();
        assert_eq!(transformed.position, 8);
        assert_eq!(bus.events().len(), 1);
        assert!(matches!(
            bus.events()[0],
            CollabEvent::OperationConflict {
                original_position: 5,
                transformed_position: 8,
                ..
            }
        ));

        let untouched = engine
            .transform_operation("doc", &op, &[Operation::insert(9, "z", "c2", 0)])
            .await
            .unwrap();
        assert_eq!(untouched.position, 5);
        assert_eq!(bus.events().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_user_lifecycle_events() {
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", None).await;
        engine
            .add_remote_user("doc", RemoteUser::new("u1", "Alice", "#112233"))
            .await
            .unwrap();
        let removed = engine.remove_remote_user("doc", "u1").await.unwrap();
        assert!(removed.is_some());
        assert!(engine.remove_remote_user("doc", "u1").await.unwrap().is_none());

        let events = bus.events();
        assert!(matches!(events[0], CollabEvent::RemoteUserConnected { .. }));
        assert!(matches!(
            events[1],
            CollabEvent::RemoteUserDisconnected { .. }
        ));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_cursor_update_validates_bounds() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("abc")).await;
        engine
            .add_remote_user("doc", RemoteUser::new("u1", "Alice", "#112233"))
            .await
            .unwrap();
        let err = engine
            .update_remote_user_cursor("doc", "u1", Some(Cursor::new(0, 9)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursorPosition(_)));

        let updated = engine
            .update_remote_user_cursor("doc", "u1", Some(Cursor::new(0, 3)), None)
            .await
            .unwrap();
        assert!(updated);
    }

    #[tokio::test]
    async fn test_cursor_update_unknown_user_is_noop() {
        let (engine, bus) = engine_with_bus();
        engine.initialize_editor("doc", Some("abc")).await;
        let updated = engine
            .update_remote_user_cursor("doc", "ghost", Some(Cursor::new(0, 1)), None)
            .await
            .unwrap();
        assert!(!updated);
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_captures_and_stores() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        engine
            .apply_operation("doc", Operation::insert(5, "!", "c1", 0))
            .await
            .unwrap();
        let snap = engine.create_snapshot("doc", "c1").await.unwrap();
        assert_eq!(snap.content, "Hello!");
        assert_eq!(snap.version, 1);
        assert_eq!(snap.client_id, "c1");
        assert_eq!(engine.snapshot("doc").await, Some(snap));
    }

    #[tokio::test]
    async fn test_cursor_broadcast_debounces() {
        // S9: two schedules inside the window produce exactly one callback.
        let (engine, _) = engine_with_bus();
        let (sink, count) = counting_sink();

        engine
            .schedule_cursor_broadcast("doc", "u1", Some(Cursor::new(0, 1)), None, sink.clone())
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine
            .schedule_cursor_broadcast("doc", "u1", Some(Cursor::new(0, 2)), None, sink)
            .await;
        assert_eq!(engine.pending_broadcasts("doc").await, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pending_broadcasts("doc").await, 0);
    }

    #[tokio::test]
    async fn test_cursor_broadcast_distinct_users_fire_independently() {
        let (engine, _) = engine_with_bus();
        let (sink, count) = counting_sink();
        engine
            .schedule_cursor_broadcast("doc", "u1", None, None, sink.clone())
            .await;
        engine
            .schedule_cursor_broadcast("doc", "u2", None, None, sink)
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_cursor_broadcast_cancels() {
        let (engine, _) = engine_with_bus();
        let (sink, count) = counting_sink();
        engine
            .schedule_cursor_broadcast("doc", "u1", None, None, sink)
            .await;
        engine.clear_cursor_broadcast("doc", "u1").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_callback_error_is_swallowed() {
        let (engine, _) = engine_with_bus();
        let sink: CursorSink = Arc::new(|_| Err("sink exploded".into()));
        engine
            .schedule_cursor_broadcast("doc", "u1", None, None, sink)
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.pending_broadcasts("doc").await, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        engine
            .apply_operation("doc", Operation::insert(5, "!", "c1", 0))
            .await
            .unwrap();
        engine
            .add_remote_user("doc", RemoteUser::new("u1", "Alice", "#112233"))
            .await
            .unwrap();
        engine.create_snapshot("doc", "c1").await.unwrap();
        let (sink, count) = counting_sink();
        engine
            .schedule_cursor_broadcast("doc", "u1", None, None, sink)
            .await;

        engine.reset("doc").await;

        assert_eq!(engine.editor_content("doc").await.as_deref(), Some(""));
        assert_eq!(engine.editor_version("doc").await, Some(0));
        assert!(engine.remote_users("doc").await.is_empty());
        assert!(engine.snapshot("doc").await.is_none());
        assert_eq!(engine.pending_broadcasts("doc").await, 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_leaves_other_editors_timers() {
        let (engine, _) = engine_with_bus();
        let (sink, count) = counting_sink();
        engine
            .schedule_cursor_broadcast("doc-a", "u1", None, None, sink.clone())
            .await;
        engine
            .schedule_cursor_broadcast("doc-b", "u1", None, None, sink)
            .await;
        engine.reset("doc-a").await;
        assert_eq!(engine.pending_broadcasts("doc-b").await, 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undo_redo_through_engine() {
        let (engine, _) = engine_with_bus();
        engine.initialize_editor("doc", Some("Hello")).await;
        engine
            .apply_operation("doc", Operation::insert(5, " World", "c1", 0))
            .await
            .unwrap();
        assert!(engine.undo("doc").await.is_some());
        assert_eq!(engine.editor_content("doc").await.as_deref(), Some("Hello"));
        assert!(engine.redo("doc").await.is_some());
        assert_eq!(
            engine.editor_content("doc").await.as_deref(),
            Some("Hello World")
        );
    }

    #[test]
    fn test_config_interval_clamped() {
        let low = EngineConfig {
            cursor_broadcast_interval: Duration::from_millis(10),
        };
        assert_eq!(low.clamped_interval(), Duration::from_millis(50));
        let high = EngineConfig {
            cursor_broadcast_interval: Duration::from_millis(500),
        };
        assert_eq!(high.clamped_interval(), Duration::from_millis(100));
        assert_eq!(
            EngineConfig::default().clamped_interval(),
            Duration::from_millis(75)
        );
    }
}
