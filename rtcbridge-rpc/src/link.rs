//! Message links carrying RPC envelopes.

use crate::endpoint::RpcEndpoint;
use crate::error::RpcError;
use rtcbridge_socket::{CloseEvent, SocketEvent, WebSocketHandle};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a message channel.
pub trait MessageLink: Send + Sync {
    fn post_message(&self, message: String) -> Result<(), RpcError>;
}

impl MessageLink for WebSocketHandle {
    fn post_message(&self, message: String) -> Result<(), RpcError> {
        self.send(message).map_err(RpcError::from)
    }
}

/// Outbound half of an in-process pipe.
#[derive(Debug, Clone)]
pub struct PipeLink {
    tx: mpsc::UnboundedSender<String>,
}

impl MessageLink for PipeLink {
    fn post_message(&self, message: String) -> Result<(), RpcError> {
        self.tx.send(message).map_err(|_| RpcError::ChannelClosed)
    }
}

/// One end of an in-process pipe.
pub struct PipeEnd {
    pub link: Arc<PipeLink>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Creates two connected pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        PipeEnd {
            link: Arc::new(PipeLink { tx: b_tx }),
            incoming: a_rx,
        },
        PipeEnd {
            link: Arc::new(PipeLink { tx: a_tx }),
            incoming: b_rx,
        },
    )
}

/// Feeds messages into `endpoint` until the sender side goes away.
///
/// Pending calls are abandoned when the stream ends.
pub async fn serve(endpoint: Arc<RpcEndpoint>, mut incoming: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = incoming.recv().await {
        if let Err(e) = endpoint.handle_message(&message) {
            tracing::warn!("RPC message error: {}", e);
        }
    }
    endpoint.close();
}

/// Feeds socket messages into `endpoint` until the socket closes.
pub async fn serve_socket(
    endpoint: Arc<RpcEndpoint>,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
) -> CloseEvent {
    let close = loop {
        match events.recv().await {
            Some(SocketEvent::Open) => tracing::debug!("RPC socket open"),
            Some(SocketEvent::Message(message)) => {
                if let Err(e) = endpoint.handle_message(&message) {
                    tracing::warn!("RPC message error: {}", e);
                }
            }
            Some(SocketEvent::Closed(close)) => break close,
            None => {
                break CloseEvent {
                    was_clean: false,
                    code: None,
                    reason: "event stream ended".to_string(),
                }
            }
        }
    };
    endpoint.close();
    close
}
