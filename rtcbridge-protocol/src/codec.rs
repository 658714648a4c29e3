//! Encoder and decoder for WebSocket messages.

use crate::error::ProtocolError;
use crate::frame::{CloseFrame, Frame, Opcode, Role};
use bytes::{Bytes, BytesMut};

/// A complete application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Close(CloseFrame),
}

/// Encodes messages into frames for one side of a connection.
///
/// A client encoder masks every frame with a fresh random key.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    role: Role,
}

impl FrameEncoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Encodes a frame, masking it if this encoder is on the client side.
    pub fn encode(&self, frame: Frame) -> Result<BytesMut, ProtocolError> {
        let frame = if self.role.masks_outgoing() {
            frame.with_mask(rand::random::<[u8; 4]>())
        } else {
            Frame { mask: None, ..frame }
        };
        frame.encode()
    }

    /// Encodes a text message.
    pub fn encode_text(&self, text: &str) -> Result<BytesMut, ProtocolError> {
        self.encode(Frame::text(text))
    }

    /// Encodes a binary message.
    pub fn encode_binary(&self, data: Bytes) -> Result<BytesMut, ProtocolError> {
        self.encode(Frame::new(Opcode::Binary, data))
    }

    /// Encodes a close message.
    pub fn encode_close(&self, close: &CloseFrame) -> Result<BytesMut, ProtocolError> {
        self.encode(Frame::close(close))
    }

    /// Encodes any message.
    pub fn encode_message(&self, message: &Message) -> Result<BytesMut, ProtocolError> {
        match message {
            Message::Text(text) => self.encode_text(text),
            Message::Binary(data) => self.encode_binary(data.clone()),
            Message::Close(close) => self.encode_close(close),
        }
    }
}

/// Decodes buffered socket data into frames and messages.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Creates a decoder seeded with bytes read past the handshake.
    pub fn with_leftover(data: BytesMut) -> Self {
        let mut decoder = Self::new();
        decoder.buffer.extend_from_slice(&data);
        decoder
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next message from the buffer.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let Some(frame) = self.decode_frame()? else {
            return Ok(None);
        };
        let message = match frame.opcode {
            Opcode::Text => {
                let text = String::from_utf8(frame.payload.to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8)?;
                Message::Text(text)
            }
            Opcode::Binary => Message::Binary(frame.payload),
            Opcode::Close => Message::Close(CloseFrame::from_payload(&frame.payload)?),
        };
        Ok(Some(message))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frames_are_masked() {
        let encoded = FrameEncoder::client().encode_text("ping").unwrap();
        assert_eq!(encoded[1] & 0x80, 0x80);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded);
        let frame = decoder.decode_frame().unwrap().unwrap();
        assert!(frame.is_masked());
        assert_eq!(&frame.payload[..], b"ping");
    }

    #[test]
    fn test_server_frames_are_unmasked() {
        let masked = Frame::text("pong").with_mask([1, 2, 3, 4]);
        let encoded = FrameEncoder::server().encode(masked).unwrap();
        assert_eq!(encoded[1] & 0x80, 0);
        assert_eq!(&encoded[2..], b"pong");
    }

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let encoder = FrameEncoder::client();
        let mut decoder = FrameDecoder::new();

        decoder.extend(&encoder.encode_text("{\"id\":\"a_1\"}").unwrap());
        decoder.extend(&encoder.encode_binary(Bytes::from_static(b"\x00\x01")).unwrap());
        decoder.extend(&encoder.encode_close(&CloseFrame::new(1000, "")).unwrap());

        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Text("{\"id\":\"a_1\"}".to_string()))
        );
        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Binary(Bytes::from_static(b"\x00\x01")))
        );
        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Close(CloseFrame::new(1000, "")))
        );
        assert_eq!(decoder.decode_message().unwrap(), None);
    }

    #[test]
    fn test_utf8_text_roundtrip() {
        let text = "h\u{e9}llo \u{1f600}";
        let encoded = FrameEncoder::server().encode_text(text).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded);
        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Text(text.to_string()))
        );
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x81, 0x02, 0xc3, 0x28]);
        assert!(matches!(
            decoder.decode_message(),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = FrameEncoder::client().encode_text("partial").unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..4]);
        assert!(decoder.decode_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 4);

        decoder.extend(&encoded[4..]);
        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Text("partial".to_string()))
        );
    }

    #[test]
    fn test_decoder_with_leftover() {
        let encoded = FrameEncoder::server().encode_text("early").unwrap();
        let mut decoder = FrameDecoder::with_leftover(encoded);
        assert_eq!(
            decoder.decode_message().unwrap(),
            Some(Message::Text("early".to_string()))
        );
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend_bytes(Bytes::from_static(b"some data"));
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
