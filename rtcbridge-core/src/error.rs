//! Signaling error types.

use thiserror::Error;

/// Errors from signaling operations.
///
/// Display strings start with the DOM exception name the operation would
/// fail with in a browser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    #[error("InvalidSessionDescriptionError: cannot set {side} {sdp_type} in state '{state}'")]
    InvalidSessionDescription {
        side: &'static str,
        sdp_type: &'static str,
        state: &'static str,
    },

    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("OperationError: {0}")]
    Operation(String),

    #[error("TimeoutError: local session info incomplete after {0} ms")]
    Timeout(u64),
}

impl SignalingError {
    /// The DOM exception name.
    pub fn name(&self) -> &'static str {
        match self {
            SignalingError::InvalidState(_) => "InvalidStateError",
            SignalingError::InvalidSessionDescription { .. } => "InvalidSessionDescriptionError",
            SignalingError::Syntax(_) => "SyntaxError",
            SignalingError::Operation(_) => "OperationError",
            SignalingError::Timeout(_) => "TimeoutError",
        }
    }

    pub(crate) fn closed() -> Self {
        SignalingError::InvalidState("signalingState is 'closed'".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_prefix_messages() {
        let errors = [
            SignalingError::closed(),
            SignalingError::InvalidSessionDescription {
                side: "local",
                sdp_type: "answer",
                state: "stable",
            },
            SignalingError::Syntax("bad candidate".into()),
            SignalingError::Operation("handler gone".into()),
            SignalingError::Timeout(10_000),
        ];
        for error in errors {
            assert!(error.to_string().starts_with(error.name()));
        }
    }
}
