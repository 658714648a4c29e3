//! # rtcbridge-protocol
//!
//! Wire protocol between the page and the local rtcbridge process.
//!
//! This crate provides:
//! - WebSocket framing (text, binary and close frames, client masking)
//! - Opening handshake for both the client and the server role
//! - Plain HTTP responses for requests that are not upgrades
//! - Protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod http;

pub use codec::{FrameDecoder, FrameEncoder, Message};
pub use error::ProtocolError;
pub use frame::{CloseFrame, Frame, Opcode, Role};
pub use handshake::{
    accept_key, decode_handshake_request, decode_handshake_response, encode_handshake_request,
    encode_handshake_response, generate_key, selected_protocol, HandshakeResponse,
};
pub use http::{
    decode_request_head, encode_http_response, reason_phrase, HttpRequest, HttpResponse,
};

/// GUID appended to the client key when computing `Sec-WebSocket-Accept`.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// WebSocket protocol version sent and accepted in the handshake.
pub const WEBSOCKET_VERSION: &str = "13";

/// Default port for the bridge.
pub const DEFAULT_PORT: u16 = 10717;

/// Maximum frame payload size (20 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 20 * 1024 * 1024;

/// Maximum size of a handshake or HTTP request head (16 KiB).
pub const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

/// Close status for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close status sent when the peer violated the framing rules.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
