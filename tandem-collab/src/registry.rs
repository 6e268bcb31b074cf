//! Session bookkeeping: who is connected and what they subscribe to.
//!
//! The registry maintains a two-way index — `session_id → Connection` and
//! `document_id → set<session_id>` — and keeps both sides consistent through
//! every mutation: a document appears in a session's subscription list
//! exactly when the session appears in that document's subscriber set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tandem_core::id::unix_millis;

use crate::error::FabricError;

/// The fabric's view of one connected peer's channel.
///
/// The WebSocket front-end provides the production implementation; tests
/// substitute a recording one. Implementations hold no back-pointers into
/// fabric state.
pub trait Transport: Send + Sync {
    fn send_text(&self, payload: &str) -> Result<(), FabricError>;
    fn is_open(&self) -> bool;
    fn close(&self, code: u16, reason: &str);
}

/// One connected client. A user may hold several sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    /// Insertion-ordered, duplicate-free.
    pub subscribed_documents: Vec<String>,
    pub last_activity: u64,
}

impl Session {
    fn new(session_id: String, user_id: String) -> Self {
        Self {
            session_id,
            user_id,
            subscribed_documents: Vec::new(),
            last_activity: unix_millis(),
        }
    }

    pub fn is_subscribed(&self, document_id: &str) -> bool {
        self.subscribed_documents
            .iter()
            .any(|doc| doc == document_id)
    }
}

pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub session: Session,
    pub is_alive: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    clients: HashMap<String, Connection>,
    sessions_by_document: HashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with no subscriptions, marked alive.
    pub fn register(
        &mut self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) {
        let session_id = session_id.into();
        let session = Session::new(session_id.clone(), user_id.into());
        self.clients.insert(
            session_id,
            Connection {
                transport,
                session,
                is_alive: true,
            },
        );
    }

    /// Remove a connection and every document-index entry pointing at it.
    pub fn unregister(&mut self, session_id: &str) -> Option<Connection> {
        let connection = self.clients.remove(session_id)?;
        for document_id in &connection.session.subscribed_documents {
            if let Some(subscribers) = self.sessions_by_document.get_mut(document_id) {
                subscribers.remove(session_id);
                if subscribers.is_empty() {
                    self.sessions_by_document.remove(document_id);
                }
            }
        }
        Some(connection)
    }

    /// Subscribe an existing session to a document. Idempotent.
    pub fn subscribe(&mut self, session_id: &str, document_id: &str) -> Result<(), FabricError> {
        let connection = self
            .clients
            .get_mut(session_id)
            .ok_or_else(|| FabricError::SessionNotFound(session_id.to_string()))?;
        if !connection.session.is_subscribed(document_id) {
            connection
                .session
                .subscribed_documents
                .push(document_id.to_string());
        }
        self.sessions_by_document
            .entry(document_id.to_string())
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    /// Silent when the session or the subscription is absent.
    pub fn unsubscribe(&mut self, session_id: &str, document_id: &str) {
        if let Some(connection) = self.clients.get_mut(session_id) {
            connection
                .session
                .subscribed_documents
                .retain(|doc| doc != document_id);
        }
        if let Some(subscribers) = self.sessions_by_document.get_mut(document_id) {
            subscribers.remove(session_id);
            if subscribers.is_empty() {
                self.sessions_by_document.remove(document_id);
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&Connection> {
        self.clients.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Connection> {
        self.clients.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.clients.contains_key(session_id)
    }

    /// Flip a connection back to alive. Returns whether it was known.
    pub fn mark_alive(&mut self, session_id: &str) -> bool {
        match self.clients.get_mut(session_id) {
            Some(connection) => {
                connection.is_alive = true;
                true
            }
            None => false,
        }
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Subscribers of one document, unordered.
    pub fn sessions_for_document(&self, document_id: &str) -> Vec<String> {
        self.sessions_by_document
            .get(document_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.sessions_by_document.len()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
        self.sessions_by_document.clear();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Transport double that records what the fabric sends.
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<String>>,
        pub closed: Mutex<Option<(u16, String)>>,
        pub open: std::sync::atomic::AtomicBool,
        pub failing: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(None),
                open: std::sync::atomic::AtomicBool::new(true),
                failing: std::sync::atomic::AtomicBool::new(false),
            })
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn closed_with(&self) -> Option<(u16, String)> {
            self.closed.lock().unwrap().clone()
        }

        pub fn set_open(&self, open: bool) {
            self.open.store(open, std::sync::atomic::Ordering::SeqCst);
        }

        /// Keep claiming open, but make every send fail.
        pub fn set_failing(&self, failing: bool) {
            self.failing
                .store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl Transport for RecordingTransport {
        fn send_text(&self, payload: &str) -> Result<(), FabricError> {
            if !self.is_open() {
                return Err(FabricError::Transport("transport closed".into()));
            }
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(FabricError::Transport("simulated send failure".into()));
            }
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn close(&self, code: u16, reason: &str) {
            *self.closed.lock().unwrap() = Some((code, reason.to_string()));
            self.set_open(false);
        }
    }
}
