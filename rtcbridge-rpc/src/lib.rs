//! # rtcbridge-rpc
//!
//! JSON RPC between two endpoints sharing one message channel.
//!
//! This crate provides:
//! - Request/response envelopes with correlated replies
//! - Object references: capability tokens for live objects on the vending side
//! - Restricted mode, where only exported methods are callable by the peer
//! - Tagged base64 encoding for binary buffers
//! - Message links over a WebSocket or an in-process pipe

pub mod binary;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod link;
pub mod scope;

pub use binary::{BinaryBuffer, BufferKind};
pub use endpoint::{ObjectRef, RemoteObject, RpcConfig, RpcEndpoint};
pub use envelope::{ResultType, ReturnValue, RpcRequest, RpcResponse};
pub use error::RpcError;
pub use link::{pipe, serve, serve_socket, MessageLink, PipeEnd, PipeLink};
pub use scope::{Call, MethodTable};

/// Envelope key naming a reference id.
pub const REF_ID_KEY: &str = "__refId";

/// Envelope key listing the methods callable on a reference.
pub const METHODS_KEY: &str = "__methods";

/// Envelope key tagging an encoded binary buffer.
pub const ARGUMENT_TYPE_KEY: &str = "__argumentType";
