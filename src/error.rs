//! Error types for wsbridge.

use thiserror::Error;

/// Main error type for wsbridge.
///
/// Only failures that terminate the server or abort session setup surface
/// here. Socket-level errors inside a running relay are handled at their
/// origin and translated into a reconnect or a session teardown, never
/// propagated as an unhandled fault.
#[derive(Debug, Error)]
pub enum Error {
    #[error("listen failed: {0}")]
    ListenFailed(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for wsbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
