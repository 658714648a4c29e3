//! Binary buffers encoded as tagged base64 objects.
//!
//! ```text
//! {"__argumentType": "Uint8Array", "base64": "AAEC"}
//! ```

use crate::error::RpcError;
use crate::ARGUMENT_TYPE_KEY;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Value};

/// Concrete buffer type carried in the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    ArrayBuffer,
    DataView,
    Int8Array,
    Uint8Array,
    Uint8ClampedArray,
    Int16Array,
    Uint16Array,
    Int32Array,
    Uint32Array,
    Float32Array,
    Float64Array,
}

impl BufferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferKind::ArrayBuffer => "ArrayBuffer",
            BufferKind::DataView => "DataView",
            BufferKind::Int8Array => "Int8Array",
            BufferKind::Uint8Array => "Uint8Array",
            BufferKind::Uint8ClampedArray => "Uint8ClampedArray",
            BufferKind::Int16Array => "Int16Array",
            BufferKind::Uint16Array => "Uint16Array",
            BufferKind::Int32Array => "Int32Array",
            BufferKind::Uint32Array => "Uint32Array",
            BufferKind::Float32Array => "Float32Array",
            BufferKind::Float64Array => "Float64Array",
        }
    }

    /// Parses a tag. Unknown tags decode as `ArrayBuffer`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "DataView" => BufferKind::DataView,
            "Int8Array" => BufferKind::Int8Array,
            "Uint8Array" => BufferKind::Uint8Array,
            "Uint8ClampedArray" => BufferKind::Uint8ClampedArray,
            "Int16Array" => BufferKind::Int16Array,
            "Uint16Array" => BufferKind::Uint16Array,
            "Int32Array" => BufferKind::Int32Array,
            "Uint32Array" => BufferKind::Uint32Array,
            "Float32Array" => BufferKind::Float32Array,
            "Float64Array" => BufferKind::Float64Array,
            _ => BufferKind::ArrayBuffer,
        }
    }

    /// Size of one element, or `None` for untyped buffers.
    pub fn bytes_per_element(&self) -> Option<usize> {
        match self {
            BufferKind::ArrayBuffer | BufferKind::DataView => None,
            BufferKind::Int8Array | BufferKind::Uint8Array | BufferKind::Uint8ClampedArray => {
                Some(1)
            }
            BufferKind::Int16Array | BufferKind::Uint16Array => Some(2),
            BufferKind::Int32Array | BufferKind::Uint32Array | BufferKind::Float32Array => Some(4),
            BufferKind::Float64Array => Some(8),
        }
    }
}

/// A byte buffer with its buffer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBuffer {
    pub kind: BufferKind,
    pub data: Bytes,
}

impl BinaryBuffer {
    pub fn new(kind: BufferKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn uint8(data: impl Into<Bytes>) -> Self {
        Self::new(BufferKind::Uint8Array, data)
    }

    /// Whether `value` is a tagged buffer.
    pub fn is_encoded(value: &Value) -> bool {
        value
            .get(ARGUMENT_TYPE_KEY)
            .is_some_and(|tag| !tag.is_null())
    }

    /// Encodes into the tagged object form.
    pub fn to_value(&self) -> Value {
        json!({
            ARGUMENT_TYPE_KEY: self.kind.as_str(),
            "base64": STANDARD.encode(&self.data),
        })
    }

    /// Decodes a tagged object. A missing `base64` field is an empty buffer.
    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        if !Self::is_encoded(value) {
            return Err(RpcError::InvalidParams("not a binary buffer".to_string()));
        }
        let kind = BufferKind::from_name(value[ARGUMENT_TYPE_KEY].as_str().unwrap_or_default());
        let encoded = value["base64"].as_str().unwrap_or_default();
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| RpcError::InvalidParams(format!("bad base64: {}", e)))?;
        Ok(Self::new(kind, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tagged_buffer() {
        let buffer = BinaryBuffer::uint8(vec![0u8, 1, 2, 255]);
        assert_eq!(
            buffer.to_value(),
            json!({"__argumentType": "Uint8Array", "base64": "AAEC/w=="})
        );
    }

    #[test]
    fn test_decode_keeps_kind() {
        let value = json!({"__argumentType": "Float32Array", "base64": "AACAPw=="});
        let buffer = BinaryBuffer::from_value(&value).unwrap();
        assert_eq!(buffer.kind, BufferKind::Float32Array);
        assert_eq!(&buffer.data[..], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(buffer.kind.bytes_per_element(), Some(4));
    }

    #[test]
    fn test_unknown_kind_is_array_buffer() {
        let value = json!({"__argumentType": "SharedArrayBuffer", "base64": "AQ=="});
        let buffer = BinaryBuffer::from_value(&value).unwrap();
        assert_eq!(buffer.kind, BufferKind::ArrayBuffer);
        assert_eq!(buffer.kind.bytes_per_element(), None);
    }

    #[test]
    fn test_missing_base64_is_empty() {
        let value = json!({"__argumentType": "ArrayBuffer"});
        assert!(BinaryBuffer::from_value(&value).unwrap().data.is_empty());
    }

    #[test]
    fn test_rejects_untagged_and_bad_base64() {
        assert!(!BinaryBuffer::is_encoded(&json!({"base64": "AA=="})));
        assert!(BinaryBuffer::from_value(&json!("AA==")).is_err());
        assert!(matches!(
            BinaryBuffer::from_value(&json!({"__argumentType": "Uint8Array", "base64": "***"})),
            Err(RpcError::InvalidParams(_))
        ));
    }
}
