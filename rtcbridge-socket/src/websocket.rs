//! WebSocket connection driven by a reader lane and a writer lane.

use crate::error::SocketError;
use bytes::BytesMut;
use parking_lot::Mutex;
use rtcbridge_protocol::{
    CloseFrame, FrameDecoder, FrameEncoder, Message, Role, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Read buffer size for socket reads (8 KiB).
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }
}

/// Close notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// True when the connection ended with a close frame.
    pub was_clean: bool,
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseEvent {
    fn unclean(reason: impl Into<String>) -> Self {
        Self {
            was_clean: false,
            code: None,
            reason: reason.into(),
        }
    }
}

/// Event delivered to the owner of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The client handshake completed.
    Open,
    Message(String),
    /// Always the last event.
    Closed(CloseEvent),
}

enum Outbound {
    Text(String),
    Close(CloseFrame),
    Shutdown,
}

type CloseHook = Box<dyn FnOnce() + Send>;

struct Shared {
    state: AtomicU8,
    protocol: Mutex<Option<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>,
    on_close: Mutex<Option<CloseHook>>,
}

impl Shared {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn emit(&self, event: SocketEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Moves a connecting or open socket to `Closing` and returns the state
    /// it was in before.
    fn begin_close(&self) -> ReadyState {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let state = ReadyState::from_u8(current);
            if !matches!(state, ReadyState::Connecting | ReadyState::Open) {
                return state;
            }
            match self.state.compare_exchange(
                current,
                ReadyState::Closing.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return state,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks the socket closed and fires the close notification once.
    fn finish(&self, event: CloseEvent) {
        self.state.store(ReadyState::Closed.as_u8(), Ordering::SeqCst);
        let Some(events) = self.events.lock().take() else {
            return;
        };
        if let Some(hook) = self.on_close.lock().take() {
            hook();
        }
        tracing::debug!(
            "Socket closed (clean={}, code={:?})",
            event.was_clean,
            event.code
        );
        let _ = events.send(SocketEvent::Closed(event));
    }
}

/// Cloneable sending side of a [`WebSocket`].
#[derive(Clone)]
pub struct WebSocketHandle {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for WebSocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketHandle")
            .field("ready_state", &self.ready_state())
            .field("protocol", &self.protocol())
            .finish()
    }
}

impl WebSocketHandle {
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// Subprotocol negotiated during the handshake.
    pub fn protocol(&self) -> Option<String> {
        self.shared.protocol.lock().clone()
    }

    /// Queues a text message.
    ///
    /// Fails while the handshake is still in progress. Messages sent after
    /// the socket started closing are dropped.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SocketError> {
        match self.ready_state() {
            ReadyState::Connecting => Err(SocketError::InvalidState("connecting")),
            ReadyState::Open => {
                let _ = self.outbound.send(Outbound::Text(text.into()));
                Ok(())
            }
            ReadyState::Closing | ReadyState::Closed => {
                tracing::debug!("Dropping message on {} socket", self.ready_state().as_str());
                Ok(())
            }
        }
    }

    /// Starts a normal closure.
    pub fn close(&self) {
        self.close_with(CLOSE_NORMAL, "");
    }

    /// Starts a closure with the given status code and reason.
    pub fn close_with(&self, code: u16, reason: &str) {
        if self.shared.begin_close() == ReadyState::Open {
            tracing::debug!("Closing socket (code={})", code);
            let _ = self
                .outbound
                .send(Outbound::Close(CloseFrame::new(code, reason)));
        }
    }

    pub(crate) fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        *self.shared.on_close.lock() = Some(Box::new(hook));
    }
}

/// A WebSocket connection.
pub struct WebSocket {
    handle: WebSocketHandle,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Lanes of a socket whose handshake has not completed yet.
pub(crate) struct PendingSocket {
    handle: WebSocketHandle,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl WebSocket {
    /// Creates a socket in the `Connecting` state.
    pub(crate) fn connecting() -> (Self, PendingSocket) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ReadyState::Connecting.as_u8()),
            protocol: Mutex::new(None),
            events: Mutex::new(Some(events_tx)),
            on_close: Mutex::new(None),
        });
        let handle = WebSocketHandle {
            shared,
            outbound: outbound_tx,
        };
        let pending = PendingSocket {
            handle: handle.clone(),
            outbound: outbound_rx,
        };
        (
            Self {
                handle,
                events: events_rx,
            },
            pending,
        )
    }

    /// Wraps a stream whose handshake already completed.
    ///
    /// `leftover` holds bytes read past the end of the handshake.
    pub fn from_stream<S>(stream: S, role: Role, leftover: BytesMut, protocol: Option<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (socket, pending) = Self::connecting();
        pending.open(stream, role, leftover, protocol, false);
        socket
    }

    /// Returns a cloneable sending handle.
    pub fn handle(&self) -> WebSocketHandle {
        self.handle.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.handle.ready_state()
    }

    pub fn protocol(&self) -> Option<String> {
        self.handle.protocol()
    }

    pub fn send(&self, text: impl Into<String>) -> Result<(), SocketError> {
        self.handle.send(text)
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Receives the next event. Returns `None` after the close notification.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// Splits into the sending handle and the event receiver.
    pub fn split(self) -> (WebSocketHandle, mpsc::UnboundedReceiver<SocketEvent>) {
        (self.handle, self.events)
    }
}

impl PendingSocket {
    /// Completes the `Connecting` phase and starts both lanes.
    pub(crate) fn open<S>(
        self,
        stream: S,
        role: Role,
        leftover: BytesMut,
        protocol: Option<String>,
        announce: bool,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let shared = self.handle.shared.clone();
        *shared.protocol.lock() = protocol;

        let opened = shared.state.compare_exchange(
            ReadyState::Connecting.as_u8(),
            ReadyState::Open.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if opened.is_err() {
            shared.finish(CloseEvent::unclean("closed before open"));
            return;
        }
        if announce {
            shared.emit(SocketEvent::Open);
        }

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(write_lane(writer, FrameEncoder::new(role), self.outbound));
        tokio::spawn(read_lane(
            reader,
            FrameDecoder::with_leftover(leftover),
            shared,
            self.handle.outbound,
        ));
    }

    /// Ends the `Connecting` phase with an unclean close.
    pub(crate) fn fail(self, reason: String) {
        self.handle.shared.finish(CloseEvent::unclean(reason));
    }
}

async fn read_lane<R>(
    mut reader: R,
    mut decoder: FrameDecoder,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        loop {
            match decoder.decode_message() {
                Ok(Some(Message::Text(text))) => {
                    tracing::debug!("Received text frame ({} bytes)", text.len());
                    shared.emit(SocketEvent::Message(text));
                }
                Ok(Some(Message::Binary(data))) => {
                    tracing::debug!("Ignoring binary frame ({} bytes)", data.len());
                }
                Ok(Some(Message::Close(close))) => {
                    tracing::debug!("Received close frame (code={:?})", close.code);
                    if shared.begin_close() == ReadyState::Open {
                        // Peer initiated, echo its code
                        let _ = outbound.send(Outbound::Close(CloseFrame {
                            code: close.code,
                            reason: String::new(),
                        }));
                    } else {
                        let _ = outbound.send(Outbound::Shutdown);
                    }
                    shared.finish(CloseEvent {
                        was_clean: true,
                        code: close.code,
                        reason: close.reason,
                    });
                    return;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Protocol error, closing connection: {}", e);
                    shared.begin_close();
                    let _ = outbound.send(Outbound::Close(CloseFrame::new(
                        CLOSE_PROTOCOL_ERROR,
                        "",
                    )));
                    shared.finish(CloseEvent {
                        was_clean: false,
                        code: Some(CLOSE_PROTOCOL_ERROR),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }

        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Connection closed by peer");
                break;
            }
            Ok(n) => decoder.extend(&buf[..n]),
            Err(e) => {
                tracing::debug!("Read error: {}", e);
                break;
            }
        }
    }

    let _ = outbound.send(Outbound::Shutdown);
    shared.finish(CloseEvent::unclean(""));
}

async fn write_lane<W>(
    mut writer: W,
    encoder: FrameEncoder,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = queue.recv().await {
        let (encoded, last) = match item {
            Outbound::Text(text) => match encoder.encode_text(&text) {
                Ok(encoded) => (encoded, false),
                Err(e) => {
                    tracing::warn!("Dropping outbound message: {}", e);
                    continue;
                }
            },
            Outbound::Close(close) => (encoder.encode_close(&close).unwrap_or_default(), true),
            Outbound::Shutdown => (BytesMut::new(), true),
        };

        if !encoded.is_empty() {
            let result = async {
                writer.write_all(&encoded).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                tracing::debug!("Write failed: {}", e);
                break;
            }
        }
        if last {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (WebSocket, WebSocket) {
        let (a, b) = duplex(64 * 1024);
        (
            WebSocket::from_stream(a, Role::Client, BytesMut::new(), None),
            WebSocket::from_stream(b, Role::Server, BytesMut::new(), Some("rpc".to_string())),
        )
    }

    fn raw_peer() -> (WebSocket, DuplexStream) {
        let (a, b) = duplex(64 * 1024);
        (
            WebSocket::from_stream(a, Role::Server, BytesMut::new(), None),
            b,
        )
    }

    #[tokio::test]
    async fn test_text_roundtrip() {
        let (client, mut server) = pair();
        assert_eq!(client.ready_state(), ReadyState::Open);
        assert_eq!(server.protocol().as_deref(), Some("rpc"));

        client.send("hello").unwrap();
        assert_eq!(
            server.recv().await,
            Some(SocketEvent::Message("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_send_order_preserved() {
        let (client, mut server) = pair();
        for i in 0..200 {
            client.send(format!("message {}", i)).unwrap();
        }
        for i in 0..200 {
            assert_eq!(
                server.recv().await,
                Some(SocketEvent::Message(format!("message {}", i)))
            );
        }
    }

    #[tokio::test]
    async fn test_clean_close() {
        let (mut client, mut server) = pair();
        client.close();
        assert_eq!(client.ready_state(), ReadyState::Closing);

        let event = server.recv().await.unwrap();
        assert_eq!(
            event,
            SocketEvent::Closed(CloseEvent {
                was_clean: true,
                code: Some(CLOSE_NORMAL),
                reason: String::new(),
            })
        );
        assert_eq!(server.ready_state(), ReadyState::Closed);

        match client.recv().await {
            Some(SocketEvent::Closed(close)) => {
                assert!(close.was_clean);
                assert_eq!(close.code, Some(CLOSE_NORMAL));
            }
            other => panic!("expected close, got {:?}", other),
        }
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let (client, _server) = pair();
        client.close();
        assert!(client.send("late").is_ok());
    }

    #[tokio::test]
    async fn test_abrupt_close_is_unclean() {
        let (mut socket, peer) = raw_peer();
        drop(peer);

        match socket.recv().await {
            Some(SocketEvent::Closed(close)) => assert!(!close.was_clean),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_unclean() {
        let (mut socket, mut peer) = raw_peer();
        // Header announces 5 bytes, only 2 arrive
        peer.write_all(&[0x81, 0x05, b'h', b'e']).await.unwrap();
        drop(peer);

        match socket.recv().await {
            Some(SocketEvent::Closed(close)) => assert!(!close.was_clean),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_protocol_error_closes_with_1002() {
        let (mut socket, mut peer) = raw_peer();
        // Ping frames are not supported
        peer.write_all(&[0x89, 0x00]).await.unwrap();

        match socket.recv().await {
            Some(SocketEvent::Closed(close)) => {
                assert!(!close.was_clean);
                assert_eq!(close.code, Some(CLOSE_PROTOCOL_ERROR));
            }
            other => panic!("expected close, got {:?}", other),
        }

        let mut reply = Vec::new();
        peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x88, 0x02, 0x03, 0xea]);
    }

    #[tokio::test]
    async fn test_server_frames_unmasked_and_binary_ignored() {
        let (mut socket, mut peer) = raw_peer();

        let client = FrameEncoder::client();
        peer.write_all(&client.encode_binary(bytes::Bytes::from_static(b"\x01")).unwrap())
            .await
            .unwrap();
        peer.write_all(&client.encode_text("after").unwrap())
            .await
            .unwrap();
        assert_eq!(
            socket.recv().await,
            Some(SocketEvent::Message("after".to_string()))
        );

        socket.send("hi").unwrap();
        let mut reply = [0u8; 4];
        peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x81, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_leftover_bytes_are_decoded() {
        let (a, _b) = duplex(1024);
        let leftover = FrameEncoder::client().encode_text("early").unwrap();
        let mut socket = WebSocket::from_stream(a, Role::Server, leftover, None);
        assert_eq!(
            socket.recv().await,
            Some(SocketEvent::Message("early".to_string()))
        );
    }

    #[tokio::test]
    async fn test_send_while_connecting_fails() {
        let (socket, pending) = WebSocket::connecting();
        assert_eq!(socket.ready_state(), ReadyState::Connecting);
        assert!(matches!(
            socket.send("too early"),
            Err(SocketError::InvalidState("connecting"))
        ));

        let (a, _b) = duplex(1024);
        pending.open(a, Role::Client, BytesMut::new(), Some("rpc".to_string()), true);
        assert_eq!(socket.ready_state(), ReadyState::Open);
        assert_eq!(socket.protocol().as_deref(), Some("rpc"));
        assert!(socket.send("now").is_ok());
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let (mut socket, pending) = WebSocket::connecting();
        socket.close();

        let (a, _b) = duplex(1024);
        pending.open(a, Role::Client, BytesMut::new(), None, true);

        match socket.recv().await {
            Some(SocketEvent::Closed(close)) => assert!(!close.was_clean),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_hook_runs_once() {
        let (client, mut server) = pair();
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook_counter = counter.clone();
        server
            .handle()
            .set_on_close(move || {
                hook_counter.fetch_add(1, Ordering::SeqCst);
            });

        client.close();
        while server.recv().await.is_some() {}
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
