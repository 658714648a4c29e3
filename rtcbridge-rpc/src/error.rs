//! RPC error types.

use std::fmt;
use thiserror::Error;

/// RPC errors.
///
/// The first group is reported to the peer as `"<method>: <message>"`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("referenced object not found")]
    ObjectNotFound,

    #[error("restricted mode and not exported")]
    NotExported,

    #[error("not a function")]
    NotAFunction,

    #[error("{0}")]
    Handler(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not available on remote object: {0}")]
    UnknownMethod(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Socket(#[from] rtcbridge_socket::SocketError),
}

impl RpcError {
    /// Creates a handler error from any displayable value.
    pub fn handler(message: impl fmt::Display) -> Self {
        RpcError::Handler(message.to_string())
    }

    /// Returns whether this error came from the peer.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_messages() {
        assert_eq!(
            RpcError::ObjectNotFound.to_string(),
            "referenced object not found"
        );
        assert_eq!(
            RpcError::NotExported.to_string(),
            "restricted mode and not exported"
        );
        assert_eq!(RpcError::NotAFunction.to_string(), "not a function");
        assert_eq!(RpcError::handler("boom").to_string(), "boom");
        assert!(RpcError::Remote("x".into()).is_remote());
        assert!(!RpcError::ChannelClosed.is_remote());
    }
}
