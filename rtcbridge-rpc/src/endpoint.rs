//! RPC endpoint: dispatch, reply correlation and object references.
//!
//! Each side of a channel owns one [`RpcEndpoint`]. Requests are resolved
//! against the default scope, or against a referenced object when the
//! envelope carries `__refId`. Replies are matched to pending calls by id.

use crate::envelope::{Envelope, ReturnValue, RpcRequest, RpcResponse};
use crate::error::RpcError;
use crate::link::MessageLink;
use crate::scope::{Call, MethodTable};
use crate::{METHODS_KEY, REF_ID_KEY};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

type Completion = oneshot::Sender<Result<ReturnValue, RpcError>>;
type ErrorCallback = Arc<dyn Fn(RpcError) + Send + Sync>;

/// Endpoint behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcConfig {
    /// Only exported methods may be invoked by the peer.
    pub restricted: bool,
    /// Deliver peer errors to the error callback instead of returning them.
    pub no_remote_exceptions: bool,
}

impl RpcConfig {
    pub fn restricted() -> Self {
        Self {
            restricted: true,
            no_remote_exceptions: true,
        }
    }
}

/// Token for an object this endpoint vended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub ref_id: String,
    pub methods: Vec<String>,
}

impl ObjectRef {
    /// Wire form sent to the peer.
    pub fn token(&self) -> Value {
        json!({ REF_ID_KEY: self.ref_id, METHODS_KEY: self.methods })
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.token().serialize(serializer)
    }
}

/// Local proxy for an object the peer vended.
pub struct RemoteObject {
    ref_id: String,
    methods: Vec<String>,
    endpoint: Weak<RpcEndpoint>,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("ref_id", &self.ref_id)
            .field("methods", &self.methods)
            .finish()
    }
}

impl RemoteObject {
    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Wire form used to hand the object back to its owner.
    pub fn token(&self) -> Value {
        json!({ REF_ID_KEY: self.ref_id })
    }

    fn resolve(&self, method: &str) -> Result<Arc<RpcEndpoint>, RpcError> {
        if !self.has_method(method) {
            return Err(RpcError::UnknownMethod(method.to_string()));
        }
        self.endpoint.upgrade().ok_or(RpcError::ChannelClosed)
    }

    /// Sends a request without expecting a reply.
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        let endpoint = self.resolve(method)?;
        endpoint.send_request(None, method, params, Some(self.ref_id.clone()))
    }

    /// Sends a request and waits for the reply.
    pub fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<ReturnValue, RpcError>> + Send + 'static {
        let started = self
            .resolve(method)
            .and_then(|endpoint| endpoint.start_call(method, params, Some(self.ref_id.clone())));
        await_reply(started)
    }
}

struct Referenced {
    target: Arc<dyn Any + Send + Sync>,
    table: Arc<MethodTable>,
}

/// One side of an RPC channel.
pub struct RpcEndpoint {
    weak_self: Weak<RpcEndpoint>,
    config: RpcConfig,
    prefix: String,
    counter: AtomicU64,
    closed: AtomicBool,
    link: RwLock<Arc<dyn MessageLink>>,
    scope: RwLock<Arc<MethodTable>>,
    /// `(ref id, method)` pairs the peer may call in restricted mode.
    exports: RwLock<HashSet<(Option<String>, String)>>,
    referenced: DashMap<String, Referenced>,
    proxies: DashMap<String, Arc<RemoteObject>>,
    pending: Mutex<HashMap<String, Completion>>,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl RpcEndpoint {
    pub fn new(link: Arc<dyn MessageLink>, config: RpcConfig) -> Arc<Self> {
        let prefix = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            prefix,
            counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            link: RwLock::new(link),
            scope: RwLock::new(Arc::new(MethodTable::new())),
            exports: RwLock::new(HashSet::new()),
            referenced: DashMap::new(),
            proxies: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            on_error: RwLock::new(None),
        })
    }

    pub fn config(&self) -> RpcConfig {
        self.config
    }

    /// Replaces the link, keeping scope, exports and references.
    pub fn set_message_link(&self, link: Arc<dyn MessageLink>) {
        *self.link.write() = link;
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Sets the default scope.
    pub fn set_scope(&self, scope: MethodTable) {
        *self.scope.write() = Arc::new(scope);
    }

    /// Sets the callback for peer errors that have no pending call.
    pub fn set_on_error(&self, callback: impl Fn(RpcError) + Send + Sync + 'static) {
        *self.on_error.write() = Some(Arc::new(callback));
    }

    pub fn export_functions(&self, names: &[&str]) {
        let mut exports = self.exports.write();
        for name in names {
            exports.insert((None, name.to_string()));
        }
    }

    pub fn unexport_functions(&self, names: &[&str]) {
        let mut exports = self.exports.write();
        for name in names {
            exports.remove(&(None, name.to_string()));
        }
    }

    /// Exports methods of a referenced object.
    pub fn export_object_functions(&self, object: &ObjectRef, names: &[&str]) {
        let mut exports = self.exports.write();
        for name in names {
            exports.insert((Some(object.ref_id.clone()), name.to_string()));
        }
    }

    fn is_exported(&self, ref_id: Option<&str>, method: &str) -> bool {
        self.exports
            .read()
            .contains(&(ref_id.map(str::to_string), method.to_string()))
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{}", self.prefix, n)
    }

    fn post<T: Serialize>(&self, message: &T) -> Result<(), RpcError> {
        let text = serde_json::to_string(message)?;
        let link = self.link.read().clone();
        link.post_message(text)
    }

    pub(crate) fn send_request(
        &self,
        id: Option<String>,
        method: &str,
        params: Vec<Value>,
        ref_id: Option<String>,
    ) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }
        let mut request = RpcRequest::new(method).with_params(params);
        request.id = id;
        request.ref_id = ref_id;
        tracing::debug!("Sending {} (id={:?})", method, request.id);
        self.post(&request)
    }

    pub(crate) fn start_call(
        &self,
        method: &str,
        params: Vec<Value>,
        ref_id: Option<String>,
    ) -> Result<oneshot::Receiver<Result<ReturnValue, RpcError>>, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if let Err(e) = self.send_request(Some(id.clone()), method, params, ref_id) {
            self.pending.lock().remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Sends a request without expecting a reply.
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        self.send_request(None, method, params, None)
    }

    /// Sends a request and waits for the reply.
    ///
    /// The request is written before this returns; the future only waits.
    pub fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<ReturnValue, RpcError>> + Send + 'static {
        await_reply(self.start_call(method, params, None))
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Vends `target` to the peer.
    ///
    /// Only `methods` present in `table` are advertised and callable. An empty
    /// list advertises the whole table.
    pub fn create_object_ref<T: Any + Send + Sync>(
        &self,
        target: Arc<T>,
        table: MethodTable,
        methods: &[&str],
    ) -> ObjectRef {
        let table = if methods.is_empty() {
            table
        } else {
            table.restrict(methods)
        };
        let ref_id = self.next_id();
        let methods: Vec<String> = table.names().into_iter().map(str::to_string).collect();

        tracing::debug!("Created object ref {} ({} methods)", ref_id, methods.len());
        self.referenced.insert(
            ref_id.clone(),
            Referenced {
                target,
                table: Arc::new(table),
            },
        );
        ObjectRef { ref_id, methods }
    }

    /// Revokes a reference. Returns false if it was already gone.
    pub fn remove_object_ref(&self, ref_id: &str) -> bool {
        let removed = self.referenced.remove(ref_id).is_some();
        if removed {
            self.exports
                .write()
                .retain(|(owner, _)| owner.as_deref() != Some(ref_id));
            tracing::debug!("Removed object ref {}", ref_id);
        }
        removed
    }

    pub fn has_object_ref(&self, ref_id: &str) -> bool {
        self.referenced.contains_key(ref_id)
    }

    /// Proxy for a token the peer sent.
    ///
    /// The same ref id always yields the same proxy.
    pub fn proxy(&self, value: &Value) -> Option<Arc<RemoteObject>> {
        let ref_id = value.get(REF_ID_KEY)?.as_str()?;
        if let Some(existing) = self.proxies.get(ref_id) {
            return Some(existing.clone());
        }
        if self.referenced.contains_key(ref_id) {
            return None;
        }

        let methods = value
            .get(METHODS_KEY)?
            .as_array()?
            .iter()
            .filter_map(|m| m.as_str().map(str::to_string))
            .collect();
        let proxy = self
            .proxies
            .entry(ref_id.to_string())
            .or_insert_with(|| {
                Arc::new(RemoteObject {
                    ref_id: ref_id.to_string(),
                    methods,
                    endpoint: self.weak_self.clone(),
                })
            })
            .clone();
        Some(proxy)
    }

    /// Resolves a token naming an object this endpoint vended.
    pub fn local<T: Any + Send + Sync>(&self, value: &Value) -> Option<Arc<T>> {
        let ref_id = value.get(REF_ID_KEY)?.as_str()?;
        let target = self.referenced.get(ref_id)?.target.clone();
        target.downcast::<T>().ok()
    }

    /// Registers proxies for every token nested in `value`.
    fn materialize(&self, value: &Value) {
        match value {
            Value::Object(map) => {
                if map.contains_key(REF_ID_KEY) {
                    self.proxy(value);
                    return;
                }
                for nested in map.values() {
                    self.materialize(nested);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.materialize(item);
                }
            }
            _ => {}
        }
    }

    /// Dispatches one inbound message.
    ///
    /// Errors answered to the peer are not returned. `Err` means the message
    /// could not be processed, or the peer reported an error that should be
    /// raised locally.
    pub fn handle_message(self: &Arc<Self>, text: &str) -> Result<(), RpcError> {
        match Envelope::parse(text)? {
            Envelope::Request(request) => self.handle_request(request),
            Envelope::Response(response) => self.handle_response(response),
        }
    }

    fn handle_request(self: &Arc<Self>, request: RpcRequest) -> Result<(), RpcError> {
        tracing::debug!("Received {} (id={:?})", request.method, request.id);

        match self.dispatch(&request) {
            Ok(result) => match request.id {
                Some(id) => self.post(&RpcResponse::ok(Some(id), result)),
                None => Ok(()),
            },
            Err(e) => {
                tracing::debug!("Request {} failed: {}", request.method, e);
                let message = format!("{}: {}", request.method, e);
                self.post(&RpcResponse::error(request.id, message))
            }
        }
    }

    fn dispatch(self: &Arc<Self>, request: &RpcRequest) -> Result<ReturnValue, RpcError> {
        let (table, target) = match &request.ref_id {
            Some(ref_id) => {
                let entry = self
                    .referenced
                    .get(ref_id)
                    .ok_or(RpcError::ObjectNotFound)?;
                (entry.table.clone(), Some(entry.target.clone()))
            }
            None => (self.scope.read().clone(), None),
        };

        if self.config.restricted && !self.is_exported(request.ref_id.as_deref(), &request.method)
        {
            return Err(RpcError::NotExported);
        }
        let handler = table.get(&request.method).ok_or(RpcError::NotAFunction)?;

        self.materialize(&Value::Array(request.params.clone()));

        let call = Call {
            endpoint: self,
            method: &request.method,
            params: &request.params,
            target: target.as_ref(),
        };
        match catch_unwind(AssertUnwindSafe(|| handler(&call))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!("Handler for {} panicked: {}", request.method, message);
                Err(RpcError::Handler(message))
            }
        }
    }

    fn handle_response(&self, response: RpcResponse) -> Result<(), RpcError> {
        let completion = response
            .id
            .as_ref()
            .and_then(|id| self.pending.lock().remove(id));

        if response.is_error() {
            let error = RpcError::Remote(response.error.unwrap_or_default());
            if let Some(completion) = completion {
                let _ = completion.send(Err(error));
                return Ok(());
            }
            if !self.config.no_remote_exceptions {
                return Err(error);
            }
            let callback = self.on_error.read().clone();
            match callback {
                Some(callback) => callback(error),
                None => tracing::warn!("Unhandled remote error: {}", error),
            }
            return Ok(());
        }

        if let Some(result) = &response.result {
            self.materialize(result);
        }
        match completion {
            Some(completion) => {
                let _ = completion.send(Ok(response.return_value()));
            }
            None => tracing::debug!("Response for unknown call {:?}", response.id),
        }
        Ok(())
    }

    /// Abandons every pending call. Their futures resolve with
    /// [`RpcError::ChannelClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let abandoned = std::mem::take(&mut *self.pending.lock());
        if !abandoned.is_empty() {
            tracing::debug!("Abandoning {} pending calls", abandoned.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn await_reply(
    started: Result<oneshot::Receiver<Result<ReturnValue, RpcError>>, RpcError>,
) -> Result<ReturnValue, RpcError> {
    match started?.await {
        Ok(result) => result,
        Err(_) => Err(RpcError::ChannelClosed),
    }
}
