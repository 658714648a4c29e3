//! # rtcbridge-client
//!
//! Page-side client for rtcbridge.
//!
//! This crate provides:
//! - A connection to the bridge over WebSocket or an in-process pipe
//! - Peer connections whose native half lives in the bridge
//! - Capture source requests (`getUserMedia`)

pub mod binding;
pub mod client;
pub mod error;

pub use binding::{peer_client_methods, RemotePeerHandler, PEER_CLIENT_METHODS};
pub use client::{BridgeClient, DEFAULT_BRIDGE_URL};
pub use error::ClientError;
