//! WebSocket opening handshake for both roles.

use crate::error::ProtocolError;
use crate::http::{decode_request_head, parse_headers, take_head, HttpRequest};
use crate::{WEBSOCKET_GUID, WEBSOCKET_VERSION};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Computes `Sec-WebSocket-Accept` for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Generates a random base64 encoded 16-byte `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Encodes the client handshake request.
pub fn encode_handshake_request(host: &str, path: &str, key: &str, protocols: &[String]) -> BytesMut {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: {}\r\nSec-WebSocket-Key: {}\r\n",
        path, host, WEBSOCKET_VERSION, key
    );
    if !protocols.is_empty() {
        request.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocols.join(", ")));
    }
    request.push_str("\r\n");

    let mut buf = BytesMut::with_capacity(request.len());
    buf.put_slice(request.as_bytes());
    buf
}

/// A parsed server handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Subprotocol selected by the server, if any.
    pub accepted_protocol: Option<String>,
}

impl HandshakeResponse {
    /// Checks `Sec-WebSocket-Accept` against the key that was sent.
    pub fn verify_accept(&self, key: &str) -> Result<(), ProtocolError> {
        let actual = self
            .headers
            .get("sec-websocket-accept")
            .ok_or(ProtocolError::MissingHeader("sec-websocket-accept"))?;
        let expected = accept_key(key);
        if *actual != expected {
            return Err(ProtocolError::InvalidAccept {
                expected,
                actual: actual.clone(),
            });
        }
        Ok(())
    }
}

/// Decodes the server handshake response (client role).
///
/// Returns `Ok(None)` until the whole head is buffered. Bytes after the
/// head stay in `buf` since the server may send frames right away.
pub fn decode_handshake_response(
    buf: &mut BytesMut,
) -> Result<Option<HandshakeResponse>, ProtocolError> {
    let Some(lines) = take_head(buf)? else {
        return Ok(None);
    };
    let status_line = lines.first().map(String::as_str).unwrap_or_default();

    let mut parts = status_line.split(' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ProtocolError::MalformedHandshake(format!(
            "bad status line: {}",
            status_line
        )));
    }
    let status: u16 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| {
        ProtocolError::MalformedHandshake(format!("bad status line: {}", status_line))
    })?;
    if status != 101 {
        return Err(ProtocolError::HandshakeRejected(status));
    }

    let headers = parse_headers(lines.iter().skip(1));
    let upgrade = headers.get("upgrade").map(String::as_str).unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(ProtocolError::MissingHeader("upgrade"));
    }

    let accepted_protocol = headers
        .get("sec-websocket-protocol")
        .filter(|p| !p.is_empty())
        .cloned();

    Ok(Some(HandshakeResponse {
        status,
        headers,
        accepted_protocol,
    }))
}

/// Decodes a request head (server role). The request may or may not be an
/// upgrade; see [`HttpRequest::is_websocket_upgrade`].
pub fn decode_handshake_request(buf: &mut BytesMut) -> Result<Option<HttpRequest>, ProtocolError> {
    decode_request_head(buf)
}

/// Subprotocol the server selects: the first one the client offered.
pub fn selected_protocol(request: &HttpRequest) -> Option<String> {
    request
        .header("sec-websocket-protocol")
        .and_then(|list| list.split(',').map(str::trim).find(|p| !p.is_empty()))
        .map(str::to_string)
}

/// Encodes the `101 Switching Protocols` response for an upgrade request.
pub fn encode_handshake_response(request: &HttpRequest) -> Result<BytesMut, ProtocolError> {
    let key = request
        .header("sec-websocket-key")
        .ok_or(ProtocolError::MissingHeader("sec-websocket-key"))?;

    let mut response = String::from(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    if let Some(protocol) = selected_protocol(request) {
        response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocol));
    }
    response.push_str(&format!("Sec-WebSocket-Accept: {}\r\n\r\n", accept_key(key)));

    let mut buf = BytesMut::with_capacity(response.len());
    buf.put_slice(response.as_bytes());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generate_key() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_server_handshake_response() {
        let mut buf = BytesMut::from(
            &b"GET /bridge HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nOrigin: http://example.com\r\nSec-WebSocket-Version: 13\r\n\r\n"[..],
        );
        let request = decode_handshake_request(&mut buf).unwrap().unwrap();
        assert!(request.is_websocket_upgrade());
        assert_eq!(request.header("origin"), Some("http://example.com"));

        let response = encode_handshake_response(&request).unwrap();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_subprotocol_selection() {
        let mut buf = BytesMut::from(
            &b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Protocol: rpc, chat\r\n\r\n"[..],
        );
        let request = decode_handshake_request(&mut buf).unwrap().unwrap();
        assert_eq!(selected_protocol(&request).as_deref(), Some("rpc"));

        let response = encode_handshake_response(&request).unwrap();
        assert!(std::str::from_utf8(&response)
            .unwrap()
            .contains("Sec-WebSocket-Protocol: rpc\r\n"));
    }

    #[test]
    fn test_handshake_response_requires_key() {
        let request = HttpRequest::default();
        assert!(matches!(
            encode_handshake_response(&request),
            Err(ProtocolError::MissingHeader("sec-websocket-key"))
        ));
    }

    #[test]
    fn test_client_handshake_roundtrip() {
        let key = generate_key();
        let protocols = vec!["rpc".to_string(), "chat".to_string()];
        let mut request_bytes = encode_handshake_request("127.0.0.1:10717", "/bridge", &key, &protocols);

        let request = decode_handshake_request(&mut request_bytes).unwrap().unwrap();
        assert_eq!(request.url, "/bridge");
        assert_eq!(request.header("sec-websocket-key"), Some(key.as_str()));
        assert_eq!(request.header("sec-websocket-protocol"), Some("rpc, chat"));

        let mut response_bytes = encode_handshake_response(&request).unwrap();
        response_bytes.extend_from_slice(b"\x81\x00");

        let response = decode_handshake_response(&mut response_bytes).unwrap().unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(response.accepted_protocol.as_deref(), Some("rpc"));
        response.verify_accept(&key).unwrap();

        // First frame stays buffered
        assert_eq!(&response_bytes[..], b"\x81\x00");
    }

    #[test]
    fn test_client_request_without_protocols() {
        let encoded = encode_handshake_request("localhost", "/", "key", &[]);
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_verify_accept_mismatch() {
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: bogus\r\n\r\n"[..],
        );
        let response = decode_handshake_response(&mut buf).unwrap().unwrap();
        assert_eq!(response.accepted_protocol, None);
        assert!(matches!(
            response.verify_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            Err(ProtocolError::InvalidAccept { .. })
        ));
    }

    #[test]
    fn test_rejected_handshake() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"[..]);
        assert!(matches!(
            decode_handshake_response(&mut buf),
            Err(ProtocolError::HandshakeRejected(404))
        ));
    }

    #[test]
    fn test_response_missing_upgrade() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 101 Switching Protocols\r\n\r\n"[..]);
        assert!(matches!(
            decode_handshake_response(&mut buf),
            Err(ProtocolError::MissingHeader("upgrade"))
        ));
    }

    #[test]
    fn test_partial_response() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n"[..]);
        assert!(decode_handshake_response(&mut buf).unwrap().is_none());
    }
}
