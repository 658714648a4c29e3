//! WebSocket frame format.
//!
//! Frame layout (2 bytes header + optional extended length + optional mask + payload):
//!
//! ```text
//! +-----+-------+--------+------+-----------------+-----------+---------+
//! | FIN | RSV13 | opcode | MASK | payload len (7) | ext len   | mask    |
//! | 1b  | 3b    | 4b     | 1b   | 7b              | 0/2/8 B   | 0/4 B   |
//! +-----+-------+--------+------+-----------------+-----------+---------+
//! | payload (XOR mask[i % 4] when masked)                                |
//! +----------------------------------------------------------------------+
//! ```
//!
//! Only single-frame text, binary and close messages are supported. Ping,
//! pong and continuation frames are rejected.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const FIN_BIT: u8 = 0x80;
const RSV_MASK: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7F;

const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Text,
    Binary,
    Close,
}

impl Opcode {
    pub fn as_u8(&self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            other => Err(ProtocolError::UnsupportedOpcode(other)),
        }
    }
}

/// Which end of the connection produces a frame.
///
/// Clients must mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn masks_outgoing(&self) -> bool {
        matches!(self, Role::Client)
    }
}

/// A parsed WebSocket frame. The payload is always stored unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    /// Masking key used on the wire, if any.
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Creates an unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Creates a text frame.
    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Creates a close frame.
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(Opcode::Close, close.to_payload())
    }

    /// Sets the masking key applied when encoding.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Size of the encoded header for a payload of `len` bytes.
    fn header_len(len: u64, masked: bool) -> usize {
        let ext = if len <= 125 {
            0
        } else if len <= u16::MAX as u64 {
            2
        } else {
            8
        };
        2 + ext + if masked { 4 } else { 0 }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len() as u64;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total_size = Self::header_len(payload_len, self.is_masked()) + self.payload.len();
        let mut buf = BytesMut::with_capacity(total_size);

        buf.put_u8(FIN_BIT | self.opcode.as_u8());

        let mask_bit = if self.is_masked() { MASK_BIT } else { 0 };
        if payload_len <= 125 {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as u64 {
            buf.put_u8(mask_bit | LEN_16);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | LEN_64);
            buf.put_u64(payload_len);
        }

        match self.mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], mask);
            }
            None => buf.put_slice(&self.payload),
        }

        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed from `buf` unless a whole frame is available.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Peek at header without consuming
        let first = buf[0];
        let second = buf[1];

        if first & RSV_MASK != 0 {
            return Err(ProtocolError::ReservedBits(first & RSV_MASK));
        }
        let opcode = Opcode::from_u8(first & OPCODE_MASK)?;
        if first & FIN_BIT == 0 {
            return Err(ProtocolError::Fragmented);
        }

        let masked = second & MASK_BIT != 0;
        let (payload_len, ext_len) = match second & LEN_MASK {
            LEN_16 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 2)
            }
            LEN_64 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::InvalidLength);
                }
                (len, 8)
            }
            literal => (literal as u64, 0),
        };

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header_len = 2 + ext_len + if masked { 4 } else { 0 };
        let total_len = header_len + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let mask = if masked {
            let offset = 2 + ext_len;
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[offset..offset + 4]);
            Some(key)
        } else {
            None
        };

        // Consume header
        buf.advance(header_len);

        let mut payload = buf.split_to(payload_len as usize);
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Some(Self {
            opcode,
            mask,
            payload: payload.freeze(),
        }))
    }
}

/// XORs `data` with `mask` applied cyclically.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Payload of a close frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Encodes the status code (big-endian) followed by the UTF-8 reason.
    pub fn to_payload(&self) -> Bytes {
        let Some(code) = self.code else {
            return Bytes::new();
        };
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(code);
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }

    /// Parses a close payload. Payloads shorter than two bytes carry no code.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 2 {
            return Ok(Self::default());
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason =
            std::str::from_utf8(&payload[2..]).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Self {
            code: Some(code),
            reason: reason.to_string(),
        })
    }
}
