//! Domain events and the event-bus seam.
//!
//! Events carry primitive payloads only, so subscribers (a storage
//! collaborator, metrics, an audit trail) never hold references back into
//! engine state. The engine emits synchronously, in the same order as the
//! state changes that produced them.

use crate::operation::{Cursor, Selection};

/// Everything observable about engine state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabEvent {
    OperationApplied {
        editor_id: String,
        operation_id: String,
        client_id: String,
        version: u64,
        timestamp: u64,
    },
    OperationBatchReceived {
        editor_id: String,
        batch_id: String,
        client_id: String,
        operation_count: usize,
        base_version: u64,
        timestamp: u64,
    },
    OperationConflict {
        editor_id: String,
        operation_id: String,
        client_id: String,
        original_position: usize,
        transformed_position: usize,
        timestamp: u64,
    },
    RemoteUserConnected {
        editor_id: String,
        user_id: String,
        name: String,
        timestamp: u64,
    },
    RemoteUserDisconnected {
        editor_id: String,
        user_id: String,
        timestamp: u64,
    },
    CursorUpdated {
        editor_id: String,
        user_id: String,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
        timestamp: u64,
    },
}

/// Sink for domain events. Implementations must not block.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: CollabEvent);
}

/// Default bus: forwards every event to the log facade.
#[derive(Debug, Default)]
pub struct LogEventBus;

impl EventBus for LogEventBus {
    fn publish(&self, event: CollabEvent) {
        log::debug!("collab event: {event:?}");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records published events for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingBus {
        events: Mutex<Vec<CollabEvent>>,
    }

    impl RecordingBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<CollabEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventBus for RecordingBus {
        fn publish(&self, event: CollabEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
