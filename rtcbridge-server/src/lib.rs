//! # rtcbridge-server
//!
//! Bridge server for rtcbridge.
//!
//! This crate provides:
//! - The WebSocket bridge endpoint with its restricted RPC scope
//! - Peer handlers driving a native media engine
//! - The media engine seam and an in-process loopback engine
//! - The polyfill script over plain HTTP on the same port

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod loopback;
pub mod peer_handler;
pub mod polyfill;

pub use bridge::{bridge_url, select_sources, BridgeConnection, BridgeServer, BRIDGE_FUNCTIONS};
pub use config::{Config, ConfigError, NetworkConfig, PolyfillConfig, SignalingSettings};
pub use engine::{
    fingerprint, parse_helper_server, CodecPayload, ComponentType, HelperServer,
    HelperServerType, MediaEngine, MediaSession, MediaSource, NativeCandidate, SessionEvent,
    SessionObserver, TransportAgent, TransportType,
};
pub use error::ServerError;
pub use loopback::{LoopbackEngine, LoopbackSource};
pub use peer_handler::{
    peer_handler_methods, BridgePeerHandler, RemoteClient, RpcSourceRegistry, SourceObject,
    SourceRegistry, PEER_HANDLER_METHODS,
};
pub use polyfill::PolyfillResponder;
