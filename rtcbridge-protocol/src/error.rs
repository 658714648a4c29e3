//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during the handshake or framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("invalid payload length: high bit set in 64-bit length")]
    InvalidLength,

    #[error("unsupported opcode: {0:#x}")]
    UnsupportedOpcode(u8),

    #[error("reserved bits set: {0:#x}")]
    ReservedBits(u8),

    #[error("fragmented frames are not supported")]
    Fragmented,

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("handshake too large: {size} bytes (max {max})")]
    HandshakeTooLarge { size: usize, max: usize },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("handshake rejected with status {0}")]
    HandshakeRejected(u16),

    #[error("invalid Sec-WebSocket-Accept: expected {expected}, got {actual}")]
    InvalidAccept { expected: String, actual: String },

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
