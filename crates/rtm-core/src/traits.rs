//! Core traits for the handshake collaborator.

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

use crate::SessionSnapshot;

/// Duplex socket produced by a handshake.
pub type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake error.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Handshake rejected by service: {0}")]
    Rejected(String),
    #[error("Invalid handshake response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Websocket dial failed: {0}")]
    Dial(#[source] Box<tungstenite::Error>),
}

impl From<tungstenite::Error> for HandshakeError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Dial(Box::new(err))
    }
}

/// Trait for exchanging a credential for a session and an open socket.
///
/// Called once at startup and again on every reconnect attempt. The
/// credential is held by the implementation.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Perform the handshake and dial the returned endpoint.
    ///
    /// # Errors
    /// Returns error if the credential exchange or the websocket dial fails.
    async fn connect(&self) -> Result<(SessionSnapshot, WsSocket), HandshakeError>;
}
