//! Client role: connect and perform the opening handshake.

use crate::error::SocketError;
use crate::websocket::WebSocket;
use bytes::BytesMut;
use rtcbridge_protocol::{
    decode_handshake_response, encode_handshake_request, generate_key, HandshakeResponse, Role,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Request path, including any query string.
    pub path: String,
    /// Offered subprotocols, in preference order.
    pub protocols: Vec<String>,
    /// Timeout for connecting and for the handshake.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            protocols: Vec::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Parses a `ws://host[:port][/path]` URL. The port defaults to 80.
    pub fn from_url(url: &str) -> Result<Self, SocketError> {
        let rest = url
            .strip_prefix("ws://")
            .ok_or_else(|| SocketError::InvalidUrl(url.to_string()))?;
        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(SocketError::InvalidUrl(url.to_string()));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| SocketError::InvalidUrl(url.to_string()))?;
                (host, port)
            }
            None => (authority, 80),
        };

        Ok(Self::new(host, port).with_path(path))
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Value of the `Host` header.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Performs the client handshake over an established stream.
///
/// Returns the parsed response and any bytes read past it.
pub async fn client_handshake<S>(
    stream: &mut S,
    config: &ClientConfig,
) -> Result<(HandshakeResponse, BytesMut), SocketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = encode_handshake_request(&config.host_header(), &config.path, &key, &config.protocols);
    tracing::debug!("Sending handshake request for {}", config.path);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let response = loop {
        if let Some(response) = decode_handshake_response(&mut buf)? {
            break response;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            tracing::debug!("Connection closed during handshake");
            return Err(SocketError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    response.verify_accept(&key)?;
    tracing::debug!(
        "Handshake complete (protocol={:?})",
        response.accepted_protocol
    );
    Ok((response, buf))
}

async fn open_stream(config: &ClientConfig) -> Result<(TcpStream, HandshakeResponse, BytesMut), SocketError> {
    tracing::debug!("Connecting to {}...", config.host_header());

    let result = tokio::time::timeout(config.connect_timeout, async {
        let mut stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true).ok();
        let (response, leftover) = client_handshake(&mut stream, config).await?;
        Ok::<_, SocketError>((stream, response, leftover))
    })
    .await;

    result.map_err(|_| {
        tracing::debug!("Connection timeout");
        SocketError::Timeout
    })?
}

/// Connects and waits for the handshake to complete.
pub async fn connect(config: ClientConfig) -> Result<WebSocket, SocketError> {
    let (stream, response, leftover) = open_stream(&config).await?;
    Ok(WebSocket::from_stream(
        stream,
        Role::Client,
        leftover,
        response.accepted_protocol,
    ))
}

/// Returns a socket in the `Connecting` state immediately and performs the
/// handshake in the background.
///
/// The socket reports [`SocketEvent::Open`](crate::SocketEvent::Open) once
/// the handshake succeeds, or an unclean close if it fails.
pub fn connect_in_background(config: ClientConfig) -> WebSocket {
    let (socket, pending) = WebSocket::connecting();
    tokio::spawn(async move {
        match open_stream(&config).await {
            Ok((stream, response, leftover)) => {
                pending.open(
                    stream,
                    Role::Client,
                    leftover,
                    response.accepted_protocol,
                    true,
                );
            }
            Err(e) => {
                tracing::warn!("Unable to connect to {}: {}", config.host_header(), e);
                pending.fail(e.to_string());
            }
        }
    });
    socket
}
