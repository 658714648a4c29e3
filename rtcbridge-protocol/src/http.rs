//! Minimal HTTP/1.1 request heads and responses.
//!
//! The bridge port serves both the WebSocket upgrade and plain requests for
//! the polyfill script, so both paths share the request head parser.

use crate::error::ProtocolError;
use crate::MAX_HANDSHAKE_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;

/// A parsed HTTP request head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub version: String,
    /// Header values keyed by lowercase header name.
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Looks up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the request asks for a WebSocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("sec-websocket-key").is_some()
    }

    /// URL path without the query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

/// An HTTP response for a non-upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Overrides the standard reason phrase.
    pub status_text: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(503)
    }
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: None,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }
}

/// Standard reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Request Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Other",
    }
}

/// Encodes a response. `Connection: close` and `Content-Length` are always
/// set and replace any caller-supplied values.
pub fn encode_http_response(response: &HttpResponse) -> BytesMut {
    let phrase = response
        .status_text
        .as_deref()
        .unwrap_or_else(|| reason_phrase(response.status));

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, phrase);
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Connection: close\r\n");
    head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));

    let mut buf = BytesMut::with_capacity(head.len() + response.body.len());
    buf.put_slice(head.as_bytes());
    buf.put_slice(response.body.as_bytes());
    buf
}

/// Removes one complete head (start line and headers) from `buf`.
///
/// Returns `Ok(None)` without consuming anything until the blank line that
/// ends the head has arrived. Both CRLF and bare LF line endings are accepted.
pub(crate) fn take_head(buf: &mut BytesMut) -> Result<Option<Vec<String>>, ProtocolError> {
    let mut line_start = 0;
    let mut end = None;
    for (i, &byte) in buf.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            end = Some((line_start, i + 1));
            break;
        }
        line_start = i + 1;
    }

    let Some((head_len, consumed)) = end else {
        if buf.len() > MAX_HANDSHAKE_SIZE {
            return Err(ProtocolError::HandshakeTooLarge {
                size: buf.len(),
                max: MAX_HANDSHAKE_SIZE,
            });
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..head_len])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    buf.advance(consumed);
    Ok(Some(head))
}

/// Parses a `Name: value` header line. Lines of any other shape are ignored.
pub(crate) fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return None;
    }
    Some((name.to_ascii_lowercase(), value.trim().to_string()))
}

/// Parses header lines into a lowercase-keyed map.
pub(crate) fn parse_headers<'a>(lines: impl Iterator<Item = &'a String>) -> HashMap<String, String> {
    lines.filter_map(|line| parse_header_line(line)).collect()
}

/// Decodes an HTTP request head.
pub fn decode_request_head(buf: &mut BytesMut) -> Result<Option<HttpRequest>, ProtocolError> {
    let Some(lines) = take_head(buf)? else {
        return Ok(None);
    };
    let Some(request_line) = lines.first() else {
        return Err(ProtocolError::MalformedHandshake(
            "empty request head".to_string(),
        ));
    };

    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or_default().to_string();
    let url = parts.next().unwrap_or_default().to_string();
    let version = parts.next().unwrap_or_default().to_string();
    if method.is_empty() || url.is_empty() {
        return Err(ProtocolError::MalformedHandshake(format!(
            "bad request line: {}",
            request_line
        )));
    }

    Ok(Some(HttpRequest {
        method,
        url,
        version,
        headers: parse_headers(lines.iter().skip(1)),
    }))
}
