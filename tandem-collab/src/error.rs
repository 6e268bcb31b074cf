use tandem_core::EngineError;
use thiserror::Error;

/// Errors raised on the session-fabric side.
///
/// Frame-level errors are caught inside the message handlers, logged, and
/// the frame dropped; a session is only ever closed by transport failure or
/// heartbeat timeout.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("operation denied: session {session_id} is not subscribed to {document_id}")]
    OperationDenied {
        session_id: String,
        document_id: String,
    },
    #[error("rate limit exceeded for user {0}")]
    RateLimited(String),
    #[error("websocket authentication failed: {0}")]
    Authentication(String),
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
