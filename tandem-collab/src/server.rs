//! WebSocket front-end: upgrade handshake, token auth, session allocation,
//! and the per-connection read/write pump.
//!
//! The upgrade request must carry an authentication token in the `token`
//! query parameter, the `x-session-token` cookie, or an
//! `Authorization: Bearer` header; anything else is rejected with HTTP 401
//! before the WebSocket is established. Token decoding itself is a
//! collaborator concern behind [`TokenDecoder`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use tandem_core::id::sortable_id;

use crate::error::FabricError;
use crate::fabric::SessionFabric;
use crate::protocol::connection_frame;
use crate::registry::Transport;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turns an opaque token into a user id.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<String, FabricError>;
}

/// Development decoder: the token itself is the user id.
pub struct InsecureTokenDecoder;

impl TokenDecoder for InsecureTokenDecoder {
    fn decode(&self, token: &str) -> Result<String, FabricError> {
        if token.is_empty() {
            return Err(FabricError::Authentication("empty token".into()));
        }
        Ok(token.to_string())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Outgoing message buffer per connection.
    pub send_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            send_buffer: 256,
        }
    }
}

/// The WebSocket collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    fabric: Arc<SessionFabric>,
    decoder: Arc<dyn TokenDecoder>,
}

impl CollabServer {
    pub fn new(
        config: ServerConfig,
        fabric: Arc<SessionFabric>,
        decoder: Arc<dyn TokenDecoder>,
    ) -> Self {
        Self {
            config,
            fabric,
            decoder,
        }
    }

    pub fn fabric(&self) -> &Arc<SessionFabric> {
        &self.fabric
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Start the heartbeat and the accept loop. Runs until the listener
    /// fails; call from an async runtime.
    pub async fn run(&self) -> Result<(), BoxError> {
        self.fabric.start_heartbeat().await;
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("tandem server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");
            let fabric = Arc::clone(&self.fabric);
            let decoder = Arc::clone(&self.decoder);
            let send_buffer = self.config.send_buffer;
            tokio::spawn(async move {
                if let Err(err) =
                    handle_connection(fabric, decoder, stream, addr, send_buffer).await
                {
                    log::debug!("connection from {addr} ended: {err}");
                }
            });
        }
    }
}

/// Channel-backed transport handed to the fabric. Sends go through the
/// connection's writer task; `close` enqueues a close frame and marks the
/// transport shut so later fan-outs skip it.
struct WsTransport {
    tx: mpsc::Sender<Message>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn send_text(&self, payload: &str) -> Result<(), FabricError> {
        if !self.is_open() {
            return Err(FabricError::Transport("connection closed".into()));
        }
        self.tx
            .try_send(Message::text(payload.to_string()))
            .map_err(|err| FabricError::Transport(err.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.tx.try_send(Message::Close(Some(frame)));
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Pull the auth token out of the upgrade request.
fn extract_token(request: &Request) -> Option<String> {
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    let headers = request.headers();
    if let Some(cookie) = headers.get("cookie").and_then(|value| value.to_str().ok()) {
        for part in cookie.split(';') {
            if let Some(token) = part.trim().strip_prefix("x-session-token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    if let Some(auth) = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

async fn handle_connection(
    fabric: Arc<SessionFabric>,
    decoder: Arc<dyn TokenDecoder>,
    stream: TcpStream,
    addr: SocketAddr,
    send_buffer: usize,
) -> Result<(), BoxError> {
    let mut user_id: Option<String> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| {
            let token = extract_token(request).ok_or_else(|| {
                log::warn!("rejecting upgrade from {addr}: no token");
                unauthorized()
            })?;
            match decoder.decode(&token) {
                Ok(decoded) => {
                    user_id = Some(decoded);
                    Ok(response)
                }
                Err(err) => {
                    log::warn!("rejecting upgrade from {addr}: {err}");
                    Err(unauthorized())
                }
            }
        },
    )
    .await?;
    let user_id = user_id.ok_or("handshake accepted without a user id")?;

    let session_id = sortable_id();
    let (mut ws_sink, mut ws_reader) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(send_buffer);
    let open = Arc::new(AtomicBool::new(true));

    // Writer task: forward the outgoing channel to the WebSocket.
    let writer_open = Arc::clone(&open);
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sink.send(message).await.is_err() || closing {
                writer_open.store(false, Ordering::SeqCst);
                break;
            }
        }
    });

    let transport = Arc::new(WsTransport {
        tx: tx.clone(),
        open: Arc::clone(&open),
    });
    fabric
        .register_client(&session_id, &user_id, transport.clone())
        .await;
    if let Err(err) = transport.send_text(&connection_frame(&session_id)) {
        log::warn!("failed to send connection frame to {addr}: {err}");
    }
    log::info!("session {session_id} connected from {addr} (user {user_id})");

    while let Some(message) = ws_reader.next().await {
        match message {
            Ok(Message::Text(text)) => {
                fabric.handle_message(&session_id, text.as_str()).await;
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.try_send(Message::Pong(data));
                fabric.mark_client_alive(&session_id).await;
            }
            Ok(Message::Pong(_)) => {
                fabric.mark_client_alive(&session_id).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                log::debug!("websocket error from {addr}: {err}");
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    fabric.unregister_client(&session_id).await;
    log::info!("session {session_id} disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_uri(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_token_from_query_parameter() {
        let request = request_with_uri("ws://localhost/?token=abc123");
        assert_eq!(extract_token(&request).as_deref(), Some("abc123"));

        let request = request_with_uri("ws://localhost/?foo=1&token=xyz");
        assert_eq!(extract_token(&request).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_token_from_cookie() {
        let request = Request::builder()
            .uri("ws://localhost/")
            .header("cookie", "theme=dark; x-session-token=cookie-token")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("cookie-token"));
    }

    #[test]
    fn test_token_from_bearer_header() {
        let request = Request::builder()
            .uri("ws://localhost/")
            .header("authorization", "Bearer bearer-token")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("bearer-token"));
    }

    #[test]
    fn test_missing_or_empty_token_is_none() {
        assert!(extract_token(&request_with_uri("ws://localhost/")).is_none());
        assert!(extract_token(&request_with_uri("ws://localhost/?token=")).is_none());
    }

    #[test]
    fn test_unauthorized_response_is_401() {
        assert_eq!(unauthorized().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_insecure_decoder_passes_token_through() {
        let decoder = InsecureTokenDecoder;
        assert_eq!(decoder.decode("u-42").unwrap(), "u-42");
        assert!(decoder.decode("").is_err());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.send_buffer, 256);
    }
}
