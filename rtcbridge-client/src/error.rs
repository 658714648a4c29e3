//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Socket(#[from] rtcbridge_socket::SocketError),

    #[error("RPC error: {0}")]
    Rpc(#[from] rtcbridge_rpc::RpcError),

    #[error("signaling error: {0}")]
    Signaling(#[from] rtcbridge_core::SignalingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NotSupportedError: {0}")]
    NotSupported(String),

    #[error("unexpected bridge response: {0}")]
    UnexpectedResponse(String),

    #[error("connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Socket(e) => e.is_retryable(),
            ClientError::ConnectionClosed => true,
            _ => false,
        }
    }
}
