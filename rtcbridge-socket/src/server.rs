//! Server role: accept upgrades and answer plain HTTP requests.

use crate::error::SocketError;
use crate::websocket::WebSocket;
use bytes::BytesMut;
use rtcbridge_protocol::{
    decode_handshake_request, encode_handshake_response, encode_http_response,
    selected_protocol, HttpRequest, HttpResponse, Role, DEFAULT_PORT,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Answers requests that do not ask for a WebSocket upgrade.
pub trait HttpResponder: Send + Sync + 'static {
    fn respond(&self, request: &HttpRequest) -> HttpResponse;
}

impl<F> HttpResponder for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        self(request)
    }
}

/// Responder used when the application supplies none.
#[derive(Debug, Default)]
pub struct ServiceUnavailable;

impl HttpResponder for ServiceUnavailable {
    fn respond(&self, _request: &HttpRequest) -> HttpResponse {
        HttpResponse::default()
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the client to send its request head.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 64,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub upgrades_total: AtomicU64,
    pub http_requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// A connection that completed the WebSocket handshake.
pub struct Accepted {
    pub socket: WebSocket,
    /// Value of the `Origin` header.
    pub origin: Option<String>,
    /// Selected subprotocol.
    pub protocol: Option<String>,
    pub remote_addr: SocketAddr,
    pub request: HttpRequest,
}

/// WebSocket server sharing its port with a plain HTTP responder.
pub struct WebSocketServer {
    config: ServerConfig,
    responder: Arc<dyn HttpResponder>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl WebSocketServer {
    /// Creates a new server.
    pub fn new(config: ServerConfig, responder: Arc<dyn HttpResponder>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            responder,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self, accepted: mpsc::Sender<Accepted>) -> Result<(), SocketError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, accepted).await
    }

    /// Runs the server on an already bound listener.
    ///
    /// Every upgraded connection is delivered on `accepted`.
    pub async fn serve(
        &self,
        listener: TcpListener,
        accepted: mpsc::Sender<Accepted>,
    ) -> Result<(), SocketError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("WebSocket server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let responder = self.responder.clone();
                            let stats = self.stats.clone();
                            let accepted = accepted.clone();
                            let handshake_timeout = self.config.handshake_timeout;

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    responder,
                                    stats.clone(),
                                    accepted,
                                    handshake_timeout,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("WebSocket server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Reads the request head, then either upgrades or answers over HTTP.
    ///
    /// On success the active connection count is released by whoever ends
    /// the connection: here for HTTP, or the socket's close hook for upgrades.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        responder: Arc<dyn HttpResponder>,
        stats: Arc<ServerStats>,
        accepted: mpsc::Sender<Accepted>,
        handshake_timeout: Duration,
    ) -> Result<(), SocketError> {
        stream.set_nodelay(true).ok();

        let mut buf = BytesMut::with_capacity(4096);
        let request = match tokio::time::timeout(
            handshake_timeout,
            read_request_head(&mut stream, &mut buf),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(SocketError::Protocol(e))) => {
                tracing::warn!("[{}] Bad request: {}", addr, e);
                write_http_response(&mut stream, &HttpResponse::new(400)).await;
                return Err(SocketError::Protocol(e));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SocketError::Timeout),
        };

        if !request.is_websocket_upgrade() {
            tracing::debug!("[{}] {} {}", addr, request.method, request.url);
            stats.http_requests_total.fetch_add(1, Ordering::Relaxed);
            let response = responder.respond(&request);
            write_http_response(&mut stream, &response).await;
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            return Ok(());
        }

        let response = encode_handshake_response(&request)?;
        stream.write_all(&response).await?;
        stream.flush().await?;

        let protocol = selected_protocol(&request);
        let origin = request.header("origin").map(str::to_string);
        tracing::info!(
            "[{}] WebSocket accepted (origin={:?}, protocol={:?})",
            addr,
            origin,
            protocol
        );
        stats.upgrades_total.fetch_add(1, Ordering::Relaxed);

        let socket = WebSocket::from_stream(stream, Role::Server, buf, protocol.clone());
        let hook_stats = stats.clone();
        socket.handle().set_on_close(move || {
            hook_stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });

        let handle = socket.handle();
        let delivered = accepted
            .send(Accepted {
                socket,
                origin,
                protocol,
                remote_addr: addr,
                request,
            })
            .await;
        if delivered.is_err() {
            tracing::warn!("[{}] No consumer for accepted sockets, closing", addr);
            handle.close();
        }
        Ok(())
    }

    /// Signals the server to stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the server statistics.
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn read_request_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<HttpRequest, SocketError> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(request) = decode_handshake_request(buf)? {
            return Ok(request);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(SocketError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_http_response(stream: &mut TcpStream, response: &HttpResponse) {
    let encoded = encode_http_response(response);
    let result = async {
        stream.write_all(&encoded).await?;
        stream.flush().await?;
        stream.shutdown().await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!("Failed to write HTTP response: {}", e);
    }
}
