//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket error: {0}")]
    Socket(#[from] rtcbridge_socket::SocketError),

    #[error("RPC error: {0}")]
    Rpc(#[from] rtcbridge_rpc::RpcError),

    #[error("signaling error: {0}")]
    Signaling(#[from] rtcbridge_core::SignalingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("media engine error: {0}")]
    Engine(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Io(_) => true,
            ServerError::Socket(e) => e.is_retryable(),
            _ => false,
        }
    }
}
