//! High-level client API.

use crate::binding::{peer_client_methods, RemotePeerHandler, PEER_CLIENT_METHODS};
use crate::error::ClientError;
use parking_lot::Mutex;
use rtcbridge_core::{
    JsonSdpCodec, MediaStream, MediaStreamConstraints, MediaStreamTrack, PeerConnection,
    PeerConnectionEvent, RtcConfiguration, SdpCodec, SignalingConfig, SignalingState, SourceInfo,
};
use rtcbridge_rpc::{
    serve_socket, MethodTable, ObjectRef, ReturnValue, RpcConfig, RpcEndpoint, RpcError,
};
use rtcbridge_socket::ClientConfig;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};

/// Where the bridge listens by default.
pub const DEFAULT_BRIDGE_URL: &str = "ws://localhost:10717/bridge";

/// Client for a running bridge.
pub struct BridgeClient {
    endpoint: Arc<RpcEndpoint>,
    codec: Arc<dyn SdpCodec>,
    signaling: SignalingConfig,
}

impl BridgeClient {
    /// Wraps an endpoint whose link already reaches the bridge.
    pub fn new(endpoint: Arc<RpcEndpoint>) -> Self {
        Self {
            endpoint,
            codec: Arc::new(JsonSdpCodec),
            signaling: SignalingConfig::default(),
        }
    }

    /// Connects to the bridge over WebSocket.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let socket = rtcbridge_socket::connect(config).await?;
        let (handle, events) = socket.split();
        let endpoint = RpcEndpoint::new(Arc::new(handle), RpcConfig::default());

        let serving = endpoint.clone();
        tokio::spawn(async move {
            let close = serve_socket(serving, events).await;
            tracing::info!(
                "Bridge connection closed (clean={}, code={:?})",
                close.was_clean,
                close.code
            );
        });
        Ok(Self::new(endpoint))
    }

    /// Connects to [`DEFAULT_BRIDGE_URL`].
    pub async fn connect_default() -> Result<Self, ClientError> {
        Self::connect(ClientConfig::from_url(DEFAULT_BRIDGE_URL)?).await
    }

    pub fn with_codec(mut self, codec: Arc<dyn SdpCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_signaling_config(mut self, signaling: SignalingConfig) -> Self {
        self.signaling = signaling;
        self
    }

    /// Returns the RPC endpoint.
    pub fn endpoint(&self) -> &Arc<RpcEndpoint> {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        !self.endpoint.is_closed()
    }

    /// Creates a peer connection and asks the bridge for its handler.
    ///
    /// Signaling calls made before the bridge answers are queued.
    pub fn create_peer_connection(
        &self,
        configuration: RtcConfiguration,
    ) -> Result<PeerConnection, ClientError> {
        if self.endpoint.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let params = serde_json::to_value(&configuration)?;

        let pc = PeerConnection::new(configuration, self.codec.clone(), self.signaling.clone());
        let client_ref = self.endpoint.create_object_ref(
            Arc::new(pc.clone()),
            peer_client_methods(),
            &PEER_CLIENT_METHODS,
        );
        let events = pc.subscribe();
        let reply = self
            .endpoint
            .call("createPeerHandler", vec![params, client_ref.token()]);

        tokio::spawn(bind_peer_handler(
            Arc::downgrade(&self.endpoint),
            pc.clone(),
            events,
            reply,
            client_ref,
        ));
        Ok(pc)
    }

    /// Requests capture sources and wraps them in a stream.
    pub async fn get_user_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<MediaStream, ClientError> {
        if !constraints.has_media() {
            return Err(ClientError::NotSupported("Options has no media".to_string()));
        }
        let params = serde_json::to_value(&constraints)?;

        let (tx, rx) = oneshot::channel();
        let receiver = Arc::new(SourcesReceiver {
            tx: Mutex::new(Some(tx)),
        });
        let table = MethodTable::new().with("gotSources", |call| {
            let receiver = call
                .target::<SourcesReceiver>()
                .ok_or(RpcError::ObjectNotFound)?;
            let sources: Vec<SourceInfo> = call.arg(0)?;
            if let Some(tx) = receiver.tx.lock().take() {
                let _ = tx.send(sources);
            }
            Ok(ReturnValue::Void)
        });
        let client_ref = self.endpoint.create_object_ref(receiver, table, &[]);

        let requested = self
            .endpoint
            .call("requestSources", vec![params, client_ref.token()])
            .await;
        let granted = match requested {
            Ok(_) => rx.await.map_err(|_| ClientError::ConnectionClosed),
            Err(e) => Err(e.into()),
        };
        self.endpoint.remove_object_ref(&client_ref.ref_id);

        let tracks = granted?
            .into_iter()
            .map(|info| MediaStreamTrack::new(info.media_type, info.label).with_source(info.source))
            .collect();
        Ok(MediaStream::new(tracks))
    }

    /// Closes the RPC endpoint. Pending calls fail.
    pub fn close(&self) {
        self.endpoint.close();
    }
}

struct SourcesReceiver {
    tx: Mutex<Option<oneshot::Sender<Vec<SourceInfo>>>>,
}

/// Attaches the bridge's handler, then revokes the client reference once the
/// connection closes.
async fn bind_peer_handler(
    endpoint: Weak<RpcEndpoint>,
    pc: PeerConnection,
    mut events: broadcast::Receiver<PeerConnectionEvent>,
    reply: impl Future<Output = Result<ReturnValue, RpcError>>,
    client_ref: ObjectRef,
) {
    let remote = match reply.await {
        Ok(ReturnValue::Value(token)) => endpoint.upgrade().and_then(|e| e.proxy(&token)),
        Ok(other) => {
            tracing::warn!("createPeerHandler returned {:?}", other);
            None
        }
        Err(e) => {
            tracing::warn!("createPeerHandler failed: {}", e);
            None
        }
    };
    match remote {
        Some(remote) => pc.attach_peer_handler(Arc::new(RemotePeerHandler::new(remote))),
        None => {
            tracing::error!("Bridge did not supply a peer handler, closing connection");
            pc.close();
        }
    }
    drop(pc);

    loop {
        match events.recv().await {
            Ok(PeerConnectionEvent::SignalingStateChange(SignalingState::Closed))
            | Err(broadcast::error::RecvError::Closed) => break,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
    if let Some(endpoint) = endpoint.upgrade() {
        endpoint.remove_object_ref(&client_ref.ref_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtcbridge_core::{
        MediaConstraint, MediaType, RtcSessionDescription, SdpType, SessionInfo,
    };
    use rtcbridge_rpc::{pipe, serve, Call};
    use serde_json::json;
    use std::time::Duration;

    fn connected() -> (Arc<RpcEndpoint>, Arc<RpcEndpoint>) {
        let (page, bridge) = pipe();
        let page_ep = RpcEndpoint::new(page.link.clone(), RpcConfig::default());
        let bridge_ep = RpcEndpoint::new(bridge.link.clone(), RpcConfig::default());
        tokio::spawn(serve(page_ep.clone(), page.incoming));
        tokio::spawn(serve(bridge_ep.clone(), bridge.incoming));
        (page_ep, bridge_ep)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_get_user_media_over_pipe() {
        let (page_ep, bridge_ep) = connected();
        bridge_ep.set_scope(MethodTable::new().with("requestSources", |call| {
            let constraints: MediaStreamConstraints = call.arg(0)?;
            assert!(constraints.audio.is_requested());
            let client = call.proxy(1)?;
            client.notify(
                "gotSources",
                vec![json!([{
                    "mediaType": "audio",
                    "label": "Built-in Microphone",
                    "source": {"__refId": "src_1", "__methods": []}
                }])],
            )?;
            Ok(ReturnValue::Void)
        }));

        let client = BridgeClient::new(page_ep);
        let constraints = MediaStreamConstraints {
            audio: MediaConstraint::Enabled(true),
            ..MediaStreamConstraints::default()
        };
        let stream = client.get_user_media(constraints).await.unwrap();

        assert_eq!(stream.tracks.len(), 1);
        let track = &stream.tracks[0];
        assert_eq!(track.kind, MediaType::Audio);
        assert_eq!(track.label, "Built-in Microphone");
        assert_eq!(track.source.as_ref().unwrap()["__refId"], "src_1");
    }

    #[tokio::test]
    async fn test_get_user_media_requires_media() {
        let (page_ep, _bridge_ep) = connected();
        let client = BridgeClient::new(page_ep);
        let err = client
            .get_user_media(MediaStreamConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotSupported(_)));
    }

    #[derive(Default)]
    struct BridgeLog {
        calls: Mutex<Vec<String>>,
        client_ref: Mutex<Option<(String, Vec<String>)>>,
    }

    fn record(
        name: &'static str,
    ) -> impl Fn(&Call<'_>) -> Result<ReturnValue, RpcError> + Send + Sync + 'static {
        move |call: &Call<'_>| {
            let log = call.target::<BridgeLog>().ok_or(RpcError::ObjectNotFound)?;
            log.calls.lock().push(name.to_string());
            Ok(ReturnValue::Void)
        }
    }

    #[tokio::test]
    async fn test_peer_connection_is_bound_to_bridge_handler() {
        let (page_ep, bridge_ep) = connected();
        let log = Arc::new(BridgeLog::default());

        let handler_log = log.clone();
        bridge_ep.set_scope(MethodTable::new().with("createPeerHandler", move |call| {
            let client = call.proxy(1)?;
            *handler_log.client_ref.lock() =
                Some((client.ref_id().to_string(), client.methods().to_vec()));

            let table = MethodTable::new()
                .with("prepareToReceive", record("prepareToReceive"))
                .with("prepareToSend", record("prepareToSend"))
                .with("addRemoteCandidate", record("addRemoteCandidate"))
                .with("stop", record("stop"));
            let handler = call.endpoint().create_object_ref(handler_log.clone(), table, &[]);
            Ok(ReturnValue::Value(handler.token()))
        }));

        let client = BridgeClient::new(page_ep.clone());
        let pc = client
            .create_peer_connection(RtcConfiguration::default())
            .unwrap();

        let offer = RtcSessionDescription::new(
            SdpType::Offer,
            JsonSdpCodec.generate(&SessionInfo::default()),
        );
        pc.set_remote_description(offer).await.unwrap();
        eventually(|| log.calls.lock().contains(&"prepareToSend".to_string())).await;

        let (client_ref_id, methods) = log.client_ref.lock().clone().unwrap();
        assert_eq!(methods.len(), PEER_CLIENT_METHODS.len());
        assert!(page_ep.has_object_ref(&client_ref_id));

        pc.close();
        eventually(|| log.calls.lock().contains(&"stop".to_string())).await;
        eventually(|| !page_ep.has_object_ref(&client_ref_id)).await;
    }

    #[tokio::test]
    async fn test_missing_bridge_handler_closes_connection() {
        let (page_ep, _bridge_ep) = connected();
        let client = BridgeClient::new(page_ep);
        let pc = client
            .create_peer_connection(RtcConfiguration::default())
            .unwrap();
        // The bridge has no createPeerHandler
        eventually(|| pc.signaling_state() == SignalingState::Closed).await;
    }

    #[tokio::test]
    async fn test_closed_client_refuses_peer_connections() {
        let (page_ep, _bridge_ep) = connected();
        let client = BridgeClient::new(page_ep);
        client.close();
        assert!(!client.is_connected());
        assert!(matches!(
            client.create_peer_connection(RtcConfiguration::default()),
            Err(ClientError::ConnectionClosed)
        ));
    }
}
