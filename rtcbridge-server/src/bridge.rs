//! Bridge server.
//!
//! Every WebSocket connection gets its own RPC endpoint in restricted mode.
//! The page may only call the functions in [`BRIDGE_FUNCTIONS`] and the
//! methods of the objects it was handed.

use crate::config::Config;
use crate::engine::{MediaEngine, MediaSource};
use crate::error::ServerError;
use crate::peer_handler::{
    peer_handler_methods, BridgePeerHandler, RemoteClient, RpcSourceRegistry, SourceRegistry,
    PEER_HANDLER_METHODS,
};
use crate::polyfill::PolyfillResponder;
use dashmap::DashMap;
use parking_lot::Mutex;
use rtcbridge_core::{
    MediaStreamConstraints, MediaType, PeerHandler, RtcConfiguration, SourceInfo,
};
use rtcbridge_rpc::{
    serve_socket, Call, MethodTable, ReturnValue, RpcConfig, RpcEndpoint, RpcError,
};
use rtcbridge_socket::{
    Accepted, ServerConfig, ServerStats, WebSocketHandle, WebSocketServer,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Functions the page may call on the default scope.
pub const BRIDGE_FUNCTIONS: [&str; 2] = ["createPeerHandler", "requestSources"];

/// URL pages use to reach a bridge bound at `addr`.
pub fn bridge_url(addr: SocketAddr) -> String {
    format!("ws://{}/bridge", addr)
}

/// Picks one source per requested kind.
///
/// A video request with `facingMode: "environment"` skips the first camera.
pub fn select_sources(
    constraints: &MediaStreamConstraints,
    sources: &[Arc<dyn MediaSource>],
) -> Vec<(MediaType, Arc<dyn MediaSource>)> {
    let mut selected = Vec::new();
    let requests = [
        (MediaType::Audio, &constraints.audio),
        (MediaType::Video, &constraints.video),
    ];
    for (media_type, constraint) in requests {
        if !constraint.is_requested() {
            continue;
        }
        let skip = usize::from(
            media_type == MediaType::Video && constraint.option("facingMode") == Some("environment"),
        );
        if let Some(source) = sources
            .iter()
            .filter(|source| source.media_type() == media_type)
            .nth(skip)
        {
            selected.push((media_type, source.clone()));
        }
    }
    selected
}

/// State of one page connection.
pub struct BridgeConnection {
    engine: Arc<dyn MediaEngine>,
    handlers: Mutex<Vec<(String, Arc<BridgePeerHandler>)>>,
    sources: Mutex<Option<Arc<RpcSourceRegistry>>>,
    closed: AtomicBool,
}

impl BridgeConnection {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            handlers: Mutex::new(Vec::new()),
            sources: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Installs the bridge scope on `endpoint`.
    pub fn attach(self: &Arc<Self>, endpoint: &RpcEndpoint) {
        let create = self.clone();
        let request = self.clone();
        endpoint.set_scope(
            MethodTable::new()
                .with("createPeerHandler", move |call| create.create_peer_handler(call))
                .with("requestSources", move |call| request.request_sources(call)),
        );
        endpoint.export_functions(&BRIDGE_FUNCTIONS);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Source references currently held by the page.
    pub fn source_refs(&self) -> Vec<String> {
        self.sources
            .lock()
            .as_ref()
            .map(|registry| registry.issued())
            .unwrap_or_default()
    }

    fn registry(&self, endpoint: &Arc<RpcEndpoint>) -> Arc<RpcSourceRegistry> {
        self.sources
            .lock()
            .get_or_insert_with(|| Arc::new(RpcSourceRegistry::new(endpoint)))
            .clone()
    }

    fn create_peer_handler(&self, call: &Call<'_>) -> Result<ReturnValue, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }
        let configuration: RtcConfiguration = call.arg(0)?;
        let client = call.proxy(1)?;
        let endpoint = call.endpoint();

        let handler = Arc::new(BridgePeerHandler::new(
            configuration,
            self.engine.clone(),
            Arc::new(RemoteClient::new(client)),
            self.registry(endpoint),
        ));
        let object = endpoint.create_object_ref(
            handler.clone(),
            peer_handler_methods(),
            &PEER_HANDLER_METHODS,
        );
        endpoint.export_object_functions(&object, &PEER_HANDLER_METHODS);
        tracing::info!("Created peer handler {}", object.ref_id);

        self.handlers.lock().push((object.ref_id.clone(), handler));
        Ok(ReturnValue::Value(object.token()))
    }

    fn request_sources(&self, call: &Call<'_>) -> Result<ReturnValue, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }
        let constraints: MediaStreamConstraints = call.arg(0)?;
        let client = call.proxy(1)?;

        let mut media_types = Vec::new();
        if constraints.audio.is_requested() {
            media_types.push(MediaType::Audio);
        }
        if constraints.video.is_requested() {
            media_types.push(MediaType::Video);
        }
        let available = self.engine.capture_sources(&media_types);

        let registry = self.registry(call.endpoint());
        let infos: Vec<SourceInfo> = select_sources(&constraints, &available)
            .into_iter()
            .map(|(media_type, source)| SourceInfo {
                media_type,
                label: source.name(),
                source: registry.register(source),
            })
            .collect();
        tracing::debug!("Granting {} capture sources", infos.len());

        client.notify("gotSources", vec![serde_json::to_value(infos)?])?;
        Ok(ReturnValue::Void)
    }

    /// Stops every peer handler and revokes its reference, then revokes the
    /// source references handed out on this connection.
    pub fn close(&self, endpoint: &RpcEndpoint) {
        self.closed.store(true, Ordering::SeqCst);
        let handlers = std::mem::take(&mut *self.handlers.lock());
        for (ref_id, handler) in handlers {
            if let Err(e) = handler.stop() {
                tracing::warn!("Failed to stop peer handler {}: {}", ref_id, e);
            }
            endpoint.remove_object_ref(&ref_id);
        }
        if let Some(registry) = self.sources.lock().take() {
            registry.release_all();
        }
    }
}

struct LiveConnection {
    handle: WebSocketHandle,
    connection: Arc<BridgeConnection>,
}

/// WebSocket bridge plus the polyfill script on the same port.
pub struct BridgeServer {
    config: Config,
    engine: Arc<dyn MediaEngine>,
    socket: WebSocketServer,
    connections: Arc<DashMap<u64, LiveConnection>>,
    next_id: AtomicU64,
}

impl BridgeServer {
    /// Creates a new server.
    pub fn new(config: Config, engine: Arc<dyn MediaEngine>) -> Result<Self, ServerError> {
        config.validate()?;
        let script = match config.polyfill.load_script()? {
            Some(script) => script,
            None => PolyfillResponder::stub_script(&bridge_url(config.network.bind_addr)),
        };
        let responder = Arc::new(PolyfillResponder::new(config.polyfill.path.clone(), script));
        let socket = WebSocketServer::new(
            ServerConfig {
                bind_addr: config.network.bind_addr,
                max_connections: config.network.max_connections,
                handshake_timeout: config.network.handshake_timeout(),
            },
            responder,
        );
        Ok(Self {
            config,
            engine,
            socket,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.network.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let (tx, mut rx) = mpsc::channel(16);
        let dispatch = async {
            while let Some(accepted) = rx.recv().await {
                self.accept(accepted);
            }
        };
        let (served, ()) = tokio::join!(self.socket.serve(listener, tx), dispatch);
        served?;
        Ok(())
    }

    fn accept(&self, accepted: Accepted) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Bridge connection {} from {} (origin {})",
            id,
            accepted.remote_addr,
            accepted.origin.as_deref().unwrap_or("none")
        );

        let (handle, events) = accepted.socket.split();
        let endpoint = RpcEndpoint::new(Arc::new(handle.clone()), RpcConfig::restricted());
        endpoint.set_on_error(move |e| tracing::warn!("Bridge connection {}: {}", id, e));
        let connection = BridgeConnection::new(self.engine.clone());
        connection.attach(&endpoint);

        self.connections.insert(
            id,
            LiveConnection {
                handle,
                connection: connection.clone(),
            },
        );
        let connections = self.connections.clone();
        tokio::spawn(async move {
            let close = serve_socket(endpoint.clone(), events).await;
            tracing::info!(
                "Bridge connection {} closed (clean={}, code={:?})",
                id,
                close.was_clean,
                close.code
            );
            connection.close(&endpoint);
            connections.remove(&id);
        });
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        self.socket.shutdown();
        for entry in self.connections.iter() {
            entry.handle.close();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        self.socket.stats()
    }

    pub fn is_running(&self) -> bool {
        self.socket.is_running()
    }

    /// Open page connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Peer handlers alive across all connections.
    pub fn peer_handler_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.connection.handler_count())
            .sum()
    }
}
