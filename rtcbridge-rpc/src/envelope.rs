//! JSON envelopes for RPC requests and responses.

use crate::error::RpcError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Request envelope.
///
/// `id` is present only when the caller expects a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<String>,

    /// Dotted method name.
    pub method: String,

    #[serde(default)]
    pub params: Vec<Value>,

    /// Selects a referenced object instead of the default scope.
    #[serde(rename = "__refId", default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Vec::new(),
            ref_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }
}

/// Type tag of a call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Undefined,
    Function,
    Object,
    String,
    Number,
    Boolean,
}

impl ResultType {
    /// Tag for a JSON value. `null` and arrays are objects.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ResultType::Boolean,
            Value::Number(_) => ResultType::Number,
            Value::String(_) => ResultType::String,
            Value::Null | Value::Array(_) | Value::Object(_) => ResultType::Object,
        }
    }
}

/// Value returned by a method.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    /// The method returned nothing.
    Void,
    /// The method returned a function, which cannot cross the channel.
    Function,
    Value(Value),
}

impl ReturnValue {
    pub fn value(self) -> Option<Value> {
        match self {
            ReturnValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, ReturnValue::Void)
    }
}

impl From<Value> for ReturnValue {
    fn from(value: Value) -> Self {
        ReturnValue::Value(value)
    }
}

/// Keeps an explicit `null` distinct from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(
        rename = "__resultType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub result_type: Option<ResultType>,
}

impl RpcResponse {
    /// Creates a success response. Void and function results travel as `null`.
    pub fn ok(id: Option<String>, result: ReturnValue) -> Self {
        let (result, result_type) = match result {
            ReturnValue::Void => (Value::Null, ResultType::Undefined),
            ReturnValue::Function => (Value::Null, ResultType::Function),
            ReturnValue::Value(value) => {
                let tag = ResultType::of(&value);
                (value, tag)
            }
        };
        Self {
            id,
            result: Some(result),
            error: None,
            result_type: Some(result_type),
        }
    }

    pub fn error(id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
            result_type: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.is_none() && self.error.is_some()
    }

    /// Converts the wire result back into a [`ReturnValue`].
    pub fn return_value(&self) -> ReturnValue {
        match self.result_type {
            Some(ResultType::Undefined) => ReturnValue::Void,
            Some(ResultType::Function) => ReturnValue::Function,
            _ => ReturnValue::Value(self.result.clone().unwrap_or(Value::Null)),
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl Envelope {
    /// Classifies a message: anything with `method` is a request, anything
    /// with `result` or `error` is a response.
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(RpcError::InvalidEnvelope("not an object".to_string()));
        };

        if object.get("method").is_some_and(|m| !m.is_null()) {
            return Ok(Envelope::Request(serde_json::from_value(value)?));
        }
        if object.contains_key("result") || object.get("error").is_some_and(|e| !e.is_null()) {
            return Ok(Envelope::Response(serde_json::from_value(value)?));
        }
        Err(RpcError::InvalidEnvelope(
            "neither request nor response".to_string(),
        ))
    }
}
