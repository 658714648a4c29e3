//! # rtcbridge-socket
//!
//! WebSocket endpoints for the link between the page and the bridge.
//!
//! A [`WebSocket`] is driven by two lanes: a reader task decoding frames and
//! a writer task draining a FIFO queue with at most one write in flight.
//! The client role connects and performs the opening handshake; the server
//! role accepts upgrades and hands every other request to an
//! [`HttpResponder`].

pub mod client;
pub mod error;
pub mod server;
pub mod websocket;

pub use client::{connect, connect_in_background, ClientConfig};
pub use error::SocketError;
pub use server::{Accepted, HttpResponder, ServerConfig, ServerStats, WebSocketServer};
pub use websocket::{CloseEvent, ReadyState, SocketEvent, WebSocket, WebSocketHandle};
