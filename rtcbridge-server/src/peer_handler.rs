//! Bridge-side half of a peer connection.
//!
//! A [`BridgePeerHandler`] turns the page's session descriptions into engine
//! configuration and reports engine events back through the page's client
//! reference.

use crate::engine::{
    fingerprint, parse_helper_server, CodecPayload, ComponentType, MediaEngine, MediaSession,
    MediaSource, NativeCandidate, SessionEvent, SessionObserver, TransportAgent,
};
use parking_lot::Mutex;
use rtcbridge_core::{
    DtlsFingerprint, DtlsSetup, IceCandidate, PeerHandler, PeerHandlerClient, RtcConfiguration,
    SessionInfo, SignalingError, SourceHandle,
};
use rtcbridge_rpc::{Call, MethodTable, RemoteObject, ReturnValue, RpcEndpoint, RpcError};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

/// Methods exported on a peer handler reference.
pub const PEER_HANDLER_METHODS: [&str; 4] =
    ["prepareToReceive", "prepareToSend", "addRemoteCandidate", "stop"];

/// Hands out and looks up references to engine sources.
pub trait SourceRegistry: Send + Sync {
    fn register(&self, source: Arc<dyn MediaSource>) -> SourceHandle;
    fn resolve(&self, handle: &SourceHandle) -> Option<Arc<dyn MediaSource>>;
}

/// Target of a vended source reference.
pub struct SourceObject(pub Arc<dyn MediaSource>);

/// Registry backed by the connection's object references.
///
/// Remembers every reference it hands out so they can be revoked together.
pub struct RpcSourceRegistry {
    endpoint: Weak<RpcEndpoint>,
    issued: Mutex<Vec<String>>,
}

impl RpcSourceRegistry {
    pub fn new(endpoint: &Arc<RpcEndpoint>) -> Self {
        Self {
            endpoint: Arc::downgrade(endpoint),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Ref ids handed out and not yet released.
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().clone()
    }

    /// Revokes every source reference this registry created.
    pub fn release_all(&self) {
        let issued = std::mem::take(&mut *self.issued.lock());
        let Some(endpoint) = self.endpoint.upgrade() else {
            return;
        };
        for ref_id in issued {
            endpoint.remove_object_ref(&ref_id);
        }
    }
}

impl SourceRegistry for RpcSourceRegistry {
    fn register(&self, source: Arc<dyn MediaSource>) -> SourceHandle {
        let Some(endpoint) = self.endpoint.upgrade() else {
            return Value::Null;
        };
        let object =
            endpoint.create_object_ref(Arc::new(SourceObject(source)), MethodTable::new(), &[]);
        self.issued.lock().push(object.ref_id.clone());
        object.token()
    }

    fn resolve(&self, handle: &SourceHandle) -> Option<Arc<dyn MediaSource>> {
        let endpoint = self.endpoint.upgrade()?;
        let object = endpoint.local::<SourceObject>(handle)?;
        Some(object.0.clone())
    }
}

/// The page's peer connection, reached over RPC.
pub struct RemoteClient {
    remote: Arc<RemoteObject>,
}

impl RemoteClient {
    pub fn new(remote: Arc<RemoteObject>) -> Self {
        Self { remote }
    }

    fn send(&self, method: &str, params: Vec<Value>) -> Result<(), SignalingError> {
        self.remote
            .notify(method, params)
            .map_err(|e| SignalingError::Operation(format!("{}: {}", method, e)))
    }
}

impl PeerHandlerClient for RemoteClient {
    fn got_send_ssrc(&self, mline: usize, ssrc: u32, cname: &str) -> Result<(), SignalingError> {
        self.send("gotSendSSRC", vec![json!(mline), json!(ssrc), json!(cname)])
    }

    fn got_dtls_fingerprint(
        &self,
        mline: usize,
        fingerprint: DtlsFingerprint,
    ) -> Result<(), SignalingError> {
        let info = serde_json::to_value(fingerprint)
            .map_err(|e| SignalingError::Operation(e.to_string()))?;
        self.send("gotDtlsFingerprint", vec![json!(mline), info])
    }

    fn got_ice_candidate(
        &self,
        mline: usize,
        candidate: IceCandidate,
        ufrag: &str,
        password: &str,
    ) -> Result<(), SignalingError> {
        let candidate = serde_json::to_value(candidate)
            .map_err(|e| SignalingError::Operation(e.to_string()))?;
        self.send(
            "gotIceCandidate",
            vec![json!(mline), candidate, json!(ufrag), json!(password)],
        )
    }

    fn candidate_gathering_done(&self, mline: usize) -> Result<(), SignalingError> {
        self.send("candidateGatheringDone", vec![json!(mline)])
    }

    fn got_remote_source(&self, mline: usize, source: SourceHandle) -> Result<(), SignalingError> {
        self.send("gotRemoteSource", vec![json!(mline), source])
    }
}

struct SessionSlot {
    session: Arc<dyn MediaSession>,
    receive_prepared: bool,
    send_prepared: bool,
}

#[derive(Default)]
struct HandlerState {
    agent: Option<Arc<dyn TransportAgent>>,
    sessions: Vec<SessionSlot>,
    stopped: bool,
}

/// Drives the native engine for one peer connection.
pub struct BridgePeerHandler {
    configuration: RtcConfiguration,
    engine: Arc<dyn MediaEngine>,
    client: Arc<dyn PeerHandlerClient>,
    sources: Arc<dyn SourceRegistry>,
    state: Mutex<HandlerState>,
}

impl BridgePeerHandler {
    pub fn new(
        configuration: RtcConfiguration,
        engine: Arc<dyn MediaEngine>,
        client: Arc<dyn PeerHandlerClient>,
        sources: Arc<dyn SourceRegistry>,
    ) -> Self {
        Self {
            configuration,
            engine,
            client,
            sources,
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Number of media sessions created so far.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn check_running(state: &HandlerState) -> Result<(), SignalingError> {
        if state.stopped {
            return Err(SignalingError::InvalidState(
                "peer handler stopped".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the agent on first use and one session per new line.
    ///
    /// `new_lines_client_mode` holds the DTLS client mode of each new line.
    fn ensure_sessions(
        &self,
        state: &mut HandlerState,
        is_initiator: bool,
        new_lines_client_mode: Vec<bool>,
    ) -> Result<Arc<dyn TransportAgent>, SignalingError> {
        let agent = match state.agent.clone() {
            Some(agent) => agent,
            None => {
                let agent = self.engine.create_transport_agent().map_err(engine_error)?;
                for server in &self.configuration.ice_servers {
                    let username = server.username.as_deref().unwrap_or_default();
                    let credential = server.credential.as_deref().unwrap_or_default();
                    for url in server.all_urls() {
                        match parse_helper_server(url, username, credential) {
                            Some(helper) => agent.add_helper_server(&helper),
                            None => tracing::debug!("Ignoring ICE server URL {}", url),
                        }
                    }
                }
                state.agent = Some(agent.clone());
                agent
            }
        };
        agent.set_ice_controlling_mode(is_initiator);

        for dtls_client_mode in new_lines_client_mode {
            let session = self
                .engine
                .create_media_session(dtls_client_mode)
                .map_err(engine_error)?;
            state.sessions.push(SessionSlot {
                session,
                receive_prepared: false,
                send_prepared: false,
            });
        }
        Ok(agent)
    }

    fn observer(&self, mline: usize) -> SessionObserver {
        let client = Arc::downgrade(&self.client);
        let sources = self.sources.clone();
        Arc::new(move |event| {
            let Some(client) = client.upgrade() else {
                return;
            };
            if let Err(e) = forward_event(client.as_ref(), sources.as_ref(), mline, event) {
                tracing::warn!("Failed to report engine event for line {}: {}", mline, e);
            }
        })
    }
}

fn engine_error(e: crate::error::ServerError) -> SignalingError {
    SignalingError::Operation(e.to_string())
}

fn forward_event(
    client: &dyn PeerHandlerClient,
    sources: &dyn SourceRegistry,
    mline: usize,
    event: SessionEvent,
) -> Result<(), SignalingError> {
    match event {
        SessionEvent::SendSsrc { ssrc, cname } => client.got_send_ssrc(mline, ssrc, &cname),
        SessionEvent::DtlsCertificate(pem) => {
            let fingerprint = fingerprint(&pem).map_err(engine_error)?;
            client.got_dtls_fingerprint(
                mline,
                DtlsFingerprint {
                    fingerprint_hash_function: "sha-256".to_string(),
                    fingerprint,
                },
            )
        }
        SessionEvent::IceCandidate(candidate) => client.got_ice_candidate(
            mline,
            candidate.to_ice_candidate(),
            &candidate.ufrag,
            &candidate.password,
        ),
        SessionEvent::CandidateGatheringDone => client.candidate_gathering_done(mline),
        SessionEvent::IncomingSource(source) => {
            client.got_remote_source(mline, sources.register(source))
        }
    }
}

fn add_remote(session: &dyn MediaSession, candidate: &IceCandidate, ufrag: &str, password: &str) {
    if session.rtcp_mux() && ComponentType::from_id(candidate.component_id) == ComponentType::Rtcp
    {
        return;
    }
    session.add_remote_candidate(NativeCandidate::from_remote(candidate, ufrag, password));
}

impl PeerHandler for BridgePeerHandler {
    fn prepare_to_receive(
        &self,
        local: &SessionInfo,
        is_initiator: bool,
    ) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        Self::check_running(&state)?;

        let new_lines = local
            .media_descriptions
            .iter()
            .skip(state.sessions.len())
            .map(|mdesc| mdesc.dtls.setup == Some(DtlsSetup::Active))
            .collect();
        let agent = self.ensure_sessions(&mut state, is_initiator, new_lines)?;

        for (mline, (slot, mdesc)) in state
            .sessions
            .iter_mut()
            .zip(&local.media_descriptions)
            .enumerate()
        {
            if slot.receive_prepared {
                continue;
            }
            let session = &slot.session;
            session.set_rtcp_mux(!is_initiator && mdesc.rtcp.mux);
            session.set_observer(self.observer(mline));
            for payload in &mdesc.payloads {
                session.add_receive_payload(CodecPayload::new(mdesc.media_type, payload));
            }
            agent.add_session(session.clone());
            slot.receive_prepared = true;
            tracing::debug!("Prepared line {} ({}) to receive", mline, mdesc.media_type.as_str());
        }
        Ok(())
    }

    fn prepare_to_send(&self, remote: &SessionInfo, is_initiator: bool) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        Self::check_running(&state)?;

        let new_lines = remote
            .media_descriptions
            .iter()
            .skip(state.sessions.len())
            .map(|mdesc| mdesc.dtls.setup != Some(DtlsSetup::Active))
            .collect();
        self.ensure_sessions(&mut state, is_initiator, new_lines)?;

        for (mline, (slot, mdesc)) in state
            .sessions
            .iter_mut()
            .zip(&remote.media_descriptions)
            .enumerate()
        {
            let session = &slot.session;
            session.set_rtcp_mux(mdesc.rtcp.mux);

            if let Some(ref ice) = mdesc.ice {
                let ufrag = ice.ufrag.as_deref().unwrap_or_default();
                let password = ice.password.as_deref().unwrap_or_default();
                for candidate in &ice.candidates {
                    add_remote(session.as_ref(), candidate, ufrag, password);
                }
            }

            let Some(ref handle) = mdesc.source else {
                continue;
            };
            if slot.send_prepared {
                continue;
            }
            let Some(payload) = mdesc.payloads.first() else {
                tracing::warn!("Line {} has a source but no payloads", mline);
                continue;
            };
            let Some(source) = self.sources.resolve(handle) else {
                tracing::warn!("Line {} names an unknown source", mline);
                continue;
            };
            session.set_send_payload(CodecPayload::new(mdesc.media_type, payload));
            session.set_send_source(source);
            slot.send_prepared = true;
            tracing::debug!("Prepared line {} to send", mline);
        }
        Ok(())
    }

    fn add_remote_candidate(
        &self,
        candidate: &IceCandidate,
        mline: usize,
        ufrag: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), SignalingError> {
        let state = self.state.lock();
        Self::check_running(&state)?;
        let slot = state
            .sessions
            .get(mline)
            .ok_or_else(|| SignalingError::Operation(format!("no media session {}", mline)))?;
        add_remote(
            slot.session.as_ref(),
            candidate,
            ufrag.unwrap_or_default(),
            password.unwrap_or_default(),
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Ok(());
        }
        state.stopped = true;
        state.sessions.clear();
        if let Some(agent) = state.agent.take() {
            agent.stop();
        }
        tracing::debug!("Peer handler stopped");
        Ok(())
    }
}

fn handler(call: &Call<'_>) -> Result<Arc<BridgePeerHandler>, RpcError> {
    call.target::<BridgePeerHandler>()
        .ok_or(RpcError::ObjectNotFound)
}

fn reported(result: Result<(), SignalingError>) -> Result<ReturnValue, RpcError> {
    result.map(|()| ReturnValue::Void).map_err(RpcError::handler)
}

/// Method table answering the page's calls on a handler reference.
pub fn peer_handler_methods() -> MethodTable {
    MethodTable::new()
        .with("prepareToReceive", |call| {
            let local: SessionInfo = call.arg(0)?;
            reported(handler(call)?.prepare_to_receive(&local, call.arg(1)?))
        })
        .with("prepareToSend", |call| {
            let remote: SessionInfo = call.arg(0)?;
            reported(handler(call)?.prepare_to_send(&remote, call.arg(1)?))
        })
        .with("addRemoteCandidate", |call| {
            let candidate: IceCandidate = call.arg(0)?;
            let ufrag: Option<String> = call.arg(2)?;
            let password: Option<String> = call.arg(3)?;
            reported(handler(call)?.add_remote_candidate(
                &candidate,
                call.arg(1)?,
                ufrag.as_deref(),
                password.as_deref(),
            ))
        })
        .with("stop", |call| reported(handler(call)?.stop()))
}
