//! Glue between a [`PeerConnection`] and its bridge-side peer handler.
//!
//! The page vends the connection to the bridge as an object reference
//! answering engine events, and drives the bridge's handler through a
//! [`RemotePeerHandler`].

use rtcbridge_core::{
    IceCandidate, PeerConnection, PeerHandler, PeerHandlerClient, SessionInfo, SignalingError,
};
use rtcbridge_rpc::{Call, MethodTable, RemoteObject, ReturnValue, RpcError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Methods the page exposes on a peer connection reference.
pub const PEER_CLIENT_METHODS: [&str; 5] = [
    "gotSendSSRC",
    "gotDtlsFingerprint",
    "gotIceCandidate",
    "candidateGatheringDone",
    "gotRemoteSource",
];

fn connection(call: &Call<'_>) -> Result<Arc<PeerConnection>, RpcError> {
    call.target::<PeerConnection>()
        .ok_or(RpcError::ObjectNotFound)
}

fn reported(result: Result<(), SignalingError>) -> Result<ReturnValue, RpcError> {
    result.map(|()| ReturnValue::Void).map_err(RpcError::handler)
}

/// Method table forwarding engine events into the referenced connection.
pub fn peer_client_methods() -> MethodTable {
    MethodTable::new()
        .with("gotSendSSRC", |call| {
            let cname: String = call.arg(2)?;
            reported(connection(call)?.got_send_ssrc(call.arg(0)?, call.arg(1)?, &cname))
        })
        .with("gotDtlsFingerprint", |call| {
            reported(connection(call)?.got_dtls_fingerprint(call.arg(0)?, call.arg(1)?))
        })
        .with("gotIceCandidate", |call| {
            let candidate: IceCandidate = call.arg(1)?;
            let ufrag: Option<String> = call.arg(2)?;
            let password: Option<String> = call.arg(3)?;
            reported(connection(call)?.got_ice_candidate(
                call.arg(0)?,
                candidate,
                ufrag.as_deref().unwrap_or_default(),
                password.as_deref().unwrap_or_default(),
            ))
        })
        .with("candidateGatheringDone", |call| {
            reported(connection(call)?.candidate_gathering_done(call.arg(0)?))
        })
        .with("gotRemoteSource", |call| {
            let source = call
                .param(1)
                .cloned()
                .ok_or_else(|| RpcError::InvalidParams("argument 1 missing".to_string()))?;
            reported(connection(call)?.got_remote_source(call.arg(0)?, source))
        })
}

/// Peer handler living on the other side of the RPC channel.
#[derive(Debug)]
pub struct RemotePeerHandler {
    remote: Arc<RemoteObject>,
}

impl RemotePeerHandler {
    pub fn new(remote: Arc<RemoteObject>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<RemoteObject> {
        &self.remote
    }

    fn send(&self, method: &str, params: Vec<Value>) -> Result<(), SignalingError> {
        self.remote
            .notify(method, params)
            .map_err(|e| SignalingError::Operation(format!("{}: {}", method, e)))
    }
}

fn to_param<T: Serialize>(value: &T) -> Result<Value, SignalingError> {
    serde_json::to_value(value).map_err(|e| SignalingError::Operation(e.to_string()))
}

impl PeerHandler for RemotePeerHandler {
    fn prepare_to_receive(
        &self,
        local: &SessionInfo,
        is_initiator: bool,
    ) -> Result<(), SignalingError> {
        self.send("prepareToReceive", vec![to_param(local)?, json!(is_initiator)])
    }

    fn prepare_to_send(&self, remote: &SessionInfo, is_initiator: bool) -> Result<(), SignalingError> {
        self.send("prepareToSend", vec![to_param(remote)?, json!(is_initiator)])
    }

    fn add_remote_candidate(
        &self,
        candidate: &IceCandidate,
        mline: usize,
        ufrag: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), SignalingError> {
        self.send(
            "addRemoteCandidate",
            vec![to_param(candidate)?, json!(mline), json!(ufrag), json!(password)],
        )
    }

    fn stop(&self) -> Result<(), SignalingError> {
        // Older bridges do not export stop
        if !self.remote.has_method("stop") {
            return Ok(());
        }
        self.send("stop", Vec::new())
    }
}
