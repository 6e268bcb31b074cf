//! Message routing, fan-out, and liveness for connected sessions.
//!
//! ```text
//! transport frame ──► handle_message ──► validate (protocol.rs)
//!                                           │
//!            ┌──────────────┬───────────────┼──────────────┐
//!            ▼              ▼               ▼              ▼
//!        operation      heartbeat       subscribe     unsubscribe
//!            │
//!            ├─ rate limit ─ subscription check ─ engine apply
//!            ▼
//!        fan-out to subscribers, excluding the sender
//! ```
//!
//! Errors inside a message handler are caught and logged; the frame is
//! dropped and the session survives. Only transport failure or a heartbeat
//! timeout closes a session.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use tandem_core::id::unix_millis;
use tandem_core::{CollaborationEngine, Operation};

use crate::error::FabricError;
use crate::protocol::{heartbeat_frame, BroadcastFrame, ClientFrame};
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::registry::{SessionRegistry, Transport};

/// Close code used for heartbeat timeout and server shutdown.
const CLOSE_NORMAL: u16 = 1000;

/// Fabric tuning knobs.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Interval between heartbeat passes.
    pub heartbeat_interval: Duration,
    pub rate_limit: RateLimiterConfig,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

struct FabricState {
    registry: SessionRegistry,
    limiter: RateLimiter,
}

/// The session fabric: registry + rate limiting + routing + heartbeat.
pub struct SessionFabric {
    state: RwLock<FabricState>,
    engine: Option<Arc<CollaborationEngine>>,
    config: FabricConfig,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SessionFabric {
    pub fn new(config: FabricConfig) -> Self {
        Self {
            state: RwLock::new(FabricState {
                registry: SessionRegistry::new(),
                limiter: RateLimiter::new(config.rate_limit.clone()),
            }),
            engine: None,
            config,
            heartbeat: Mutex::new(None),
        }
    }

    /// Wire a collaboration engine in: operation frames will be applied to
    /// it (documentId doubles as editorId) before fan-out, and subscribing
    /// lazily initializes the editor.
    pub fn with_engine(config: FabricConfig, engine: Arc<CollaborationEngine>) -> Self {
        let mut fabric = Self::new(config);
        fabric.engine = Some(engine);
        fabric
    }

    /// Add a connection: alive, no subscriptions.
    pub async fn register_client(
        &self,
        session_id: &str,
        user_id: &str,
        transport: Arc<dyn Transport>,
    ) {
        let mut state = self.state.write().await;
        state.registry.register(session_id, user_id, transport);
        log::info!("session {session_id} registered for user {user_id}");
    }

    /// Remove a connection from every subscription and drop its rate-limit
    /// bucket. Returns whether the session was known.
    pub async fn unregister_client(&self, session_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.registry.unregister(session_id) {
            Some(connection) => {
                state.limiter.clear_user(&connection.session.user_id);
                log::info!("session {session_id} unregistered");
                true
            }
            None => false,
        }
    }

    pub async fn subscribe(&self, session_id: &str, document_id: &str) -> Result<(), FabricError> {
        self.state
            .write()
            .await
            .registry
            .subscribe(session_id, document_id)?;
        if let Some(engine) = &self.engine {
            engine.initialize_editor(document_id, None).await;
        }
        log::debug!("session {session_id} subscribed to {document_id}");
        Ok(())
    }

    pub async fn unsubscribe(&self, session_id: &str, document_id: &str) {
        self.state
            .write()
            .await
            .registry
            .unsubscribe(session_id, document_id);
    }

    /// Incoming heartbeat frames and transport-level pongs both land here.
    pub async fn mark_client_alive(&self, session_id: &str) {
        self.state.write().await.registry.mark_alive(session_id);
    }

    /// Entry point for every inbound frame. Never raises: failures are
    /// logged and the frame dropped so one bad frame cannot take the
    /// session down.
    pub async fn handle_message(&self, session_id: &str, raw: &str) {
        if let Err(err) = self.dispatch(session_id, raw).await {
            log::warn!("dropping frame from session {session_id}: {err}");
        }
    }

    async fn dispatch(&self, conn_session_id: &str, raw: &str) -> Result<(), FabricError> {
        let frame = ClientFrame::parse(raw)?;
        if frame.session_id() != conn_session_id {
            return Err(FabricError::InvalidMessage(format!(
                "frame sessionId {:?} does not match connection {conn_session_id:?}",
                frame.session_id()
            )));
        }

        match frame {
            ClientFrame::Heartbeat { session_id, .. } => {
                let mut state = self.state.write().await;
                state.registry.mark_alive(&session_id);
                if let Some(connection) = state.registry.get_mut(&session_id) {
                    connection.session.last_activity = unix_millis();
                }
                Ok(())
            }
            ClientFrame::Subscribe {
                session_id,
                document_id,
            } => self.subscribe(&session_id, &document_id).await,
            ClientFrame::Unsubscribe {
                session_id,
                document_id,
            } => {
                self.unsubscribe(&session_id, &document_id).await;
                Ok(())
            }
            ClientFrame::Operation {
                session_id,
                document_id,
                operation,
                ..
            } => {
                self.handle_operation(&session_id, document_id, operation)
                    .await
            }
        }
    }

    /// The operation path: session lookup, rate limit, subscription check,
    /// engine apply, fan-out excluding the sender, activity bump.
    async fn handle_operation(
        &self,
        session_id: &str,
        document_id: String,
        operation: Operation,
    ) -> Result<(), FabricError> {
        let sender = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let connection = state
                .registry
                .get(session_id)
                .ok_or_else(|| FabricError::SessionNotFound(session_id.to_string()))?;
            let user_id = connection.session.user_id.clone();
            let transport = Arc::clone(&connection.transport);
            let subscribed = connection.session.is_subscribed(&document_id);

            state.limiter.check_and_record(&user_id)?;
            if !subscribed {
                return Err(FabricError::OperationDenied {
                    session_id: session_id.to_string(),
                    document_id,
                });
            }
            transport
        };

        if let Some(engine) = &self.engine {
            if let Err(err) = engine.apply_operation(&document_id, operation.clone()).await {
                log::warn!("operation rejected for document {document_id}: {err}");
                let note =
                    BroadcastFrame::notification(&document_id, json!({ "error": err.to_string() }));
                if let Err(send_err) = sender.send_text(&note.to_json()) {
                    log::warn!("failed to notify session {session_id}: {send_err}");
                }
                return Ok(());
            }
        }

        let data = serde_json::to_value(&operation)
            .map_err(|err| FabricError::InvalidMessage(err.to_string()))?;
        let frame = BroadcastFrame::operation(&document_id, data, Some(session_id.to_string()));
        self.broadcast(&frame).await;

        let mut state = self.state.write().await;
        if let Some(connection) = state.registry.get_mut(session_id) {
            connection.session.last_activity = unix_millis();
        }
        Ok(())
    }

    /// Fan a frame out to the document's subscribers. The excluded session
    /// and closed transports are skipped; per-send failures are logged and
    /// never abort the loop. Returns the number of deliveries.
    pub async fn broadcast(&self, frame: &BroadcastFrame) -> usize {
        let serialized = frame.to_json();
        let state = self.state.read().await;
        let mut delivered = 0;
        for session_id in state.registry.sessions_for_document(&frame.document_id) {
            if frame.exclude_session_id.as_deref() == Some(session_id.as_str()) {
                continue;
            }
            let Some(connection) = state.registry.get(&session_id) else {
                continue;
            };
            if !connection.transport.is_open() {
                continue;
            }
            match connection.transport.send_text(&serialized) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log::warn!("broadcast to session {session_id} failed: {err}");
                }
            }
        }
        delivered
    }

    /// Start the periodic heartbeat. A no-op when already running.
    pub async fn start_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock().await;
        if slot.is_some() {
            return;
        }
        let fabric = Arc::clone(self);
        let interval = self.config.heartbeat_interval;
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                fabric.heartbeat_pass().await;
            }
        }));
    }

    /// One liveness sweep: sessions that missed the previous tick are
    /// closed and unregistered; the rest are marked pending and probed.
    pub async fn heartbeat_pass(&self) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut dead = Vec::new();
        let probe = heartbeat_frame();
        for session_id in state.registry.session_ids() {
            let Some(connection) = state.registry.get_mut(&session_id) else {
                continue;
            };
            if !connection.is_alive {
                dead.push(session_id);
                continue;
            }
            connection.is_alive = false;
            if let Err(err) = connection.transport.send_text(&probe) {
                log::warn!("heartbeat probe to session {session_id} failed: {err}");
            }
        }

        for session_id in dead {
            if let Some(connection) = state.registry.unregister(&session_id) {
                connection.transport.close(CLOSE_NORMAL, "Heartbeat timeout");
                state.limiter.clear_user(&connection.session.user_id);
                log::info!("session {session_id} closed: heartbeat timeout");
            }
        }
    }

    /// Stop the heartbeat, close every transport, clear all state.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.write().await;
        for session_id in state.registry.session_ids() {
            if let Some(connection) = state.registry.get(&session_id) {
                connection.transport.close(CLOSE_NORMAL, "Server shutdown");
            }
        }
        state.registry.clear();
        state.limiter.clear_all();
        log::info!("session fabric shut down");
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    pub async fn subscriber_count(&self, document_id: &str) -> usize {
        self.state
            .read()
            .await
            .registry
            .sessions_for_document(document_id)
            .len()
    }

    pub async fn contains_session(&self, session_id: &str) -> bool {
        self.state.read().await.registry.contains(session_id)
    }
}
