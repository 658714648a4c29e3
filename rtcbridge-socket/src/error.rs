//! Socket error types.

use thiserror::Error;

/// Socket endpoint errors.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rtcbridge_protocol::ProtocolError),

    #[error("invalid state: socket is {0}")]
    InvalidState(&'static str),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

impl SocketError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SocketError::Io(_) | SocketError::Timeout | SocketError::ConnectionClosed
        )
    }
}
