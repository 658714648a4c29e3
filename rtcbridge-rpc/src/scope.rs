//! Method tables and call context.

use crate::binary::BinaryBuffer;
use crate::endpoint::{RemoteObject, RpcEndpoint};
use crate::envelope::ReturnValue;
use crate::error::RpcError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A method implementation.
pub type Handler = Arc<dyn Fn(&Call<'_>) -> Result<ReturnValue, RpcError> + Send + Sync>;

/// Dotted method names mapped to handlers.
///
/// Used both as the default scope of an endpoint and as the method set of
/// an object reference.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method, builder style.
    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Call<'_>) -> Result<ReturnValue, RpcError> + Send + Sync + 'static,
    {
        self.insert(name, handler);
        self
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Call<'_>) -> Result<ReturnValue, RpcError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
    }

    /// Copy of the table holding only `names`.
    pub fn restrict(&self, names: &[&str]) -> Self {
        let methods = names
            .iter()
            .filter_map(|name| {
                self.methods
                    .get(*name)
                    .map(|handler| (name.to_string(), handler.clone()))
            })
            .collect();
        Self { methods }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.methods.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

/// Context passed to a handler for one inbound request.
pub struct Call<'a> {
    pub(crate) endpoint: &'a Arc<RpcEndpoint>,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [Value],
    pub(crate) target: Option<&'a Arc<dyn Any + Send + Sync>>,
}

impl<'a> Call<'a> {
    /// The endpoint that received the request.
    pub fn endpoint(&self) -> &Arc<RpcEndpoint> {
        self.endpoint
    }

    pub fn method(&self) -> &str {
        self.method
    }

    pub fn params(&self) -> &[Value] {
        self.params
    }

    /// Raw parameter at `index`.
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    /// Deserializes the parameter at `index`. A missing parameter reads as `null`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.params.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidParams(format!("argument {}: {}", index, e)))
    }

    /// Decodes a binary buffer parameter.
    pub fn binary(&self, index: usize) -> Result<BinaryBuffer, RpcError> {
        let value = self
            .params
            .get(index)
            .ok_or_else(|| RpcError::InvalidParams(format!("argument {} missing", index)))?;
        BinaryBuffer::from_value(value)
    }

    /// Proxy for a reference the peer passed at `index`.
    pub fn proxy(&self, index: usize) -> Result<Arc<RemoteObject>, RpcError> {
        self.params
            .get(index)
            .and_then(|value| self.endpoint.proxy(value))
            .ok_or_else(|| RpcError::InvalidParams(format!("argument {} is not a reference", index)))
    }

    /// Resolves a token for an object this endpoint vended.
    pub fn local<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, RpcError> {
        self.params
            .get(index)
            .and_then(|value| self.endpoint.local::<T>(value))
            .ok_or(RpcError::ObjectNotFound)
    }

    /// The referenced object the request was addressed to, if any.
    pub fn target<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.target
            .cloned()
            .and_then(|target| target.downcast::<T>().ok())
    }
}
