//! Peer connection: the public signaling API.
//!
//! Signaling calls are queued and run one at a time. Native engine events
//! (through [`PeerHandlerClient`]) update the local description in place and
//! complete a pending `set_local_description` once every line has its
//! SSRC, DTLS fingerprint and ICE credentials.

use crate::candidate::{format_candidate, parse_candidate};
use crate::error::SignalingError;
use crate::handler::{PeerHandler, PeerHandlerClient, SdpCodec};
use crate::media::{MediaStream, MediaStreamTrack, RtcDataChannel};
use crate::queue::OperationQueue;
use crate::session::{
    default_payloads, DtlsFingerprint, DtlsInfo, DtlsSetup, IceCandidate, IceInfo,
    MediaDescription, MediaMode, MediaType, SessionInfo, SourceHandle,
};
use crate::state::{transition, DescriptionSide, IceGatheringState, SignalingState};
use crate::types::{
    RtcConfiguration, RtcIceCandidate, RtcOfferOptions, RtcSessionDescription, SdpType,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 256;

/// Signaling settings.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// How long `set_local_description` waits for the engine to supply
    /// parameters for new lines.
    pub local_info_timeout: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            local_info_timeout: Duration::from_secs(10),
        }
    }
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerConnectionEvent {
    NegotiationNeeded,
    /// A trickled local candidate, or `None` at end of candidates.
    IceCandidate(Option<RtcIceCandidate>),
    SignalingStateChange(SignalingState),
    IceGatheringStateChange(IceGatheringState),
    AddStream(MediaStream),
}

#[derive(Debug, Clone, Default)]
struct RemoteSourceStatus {
    expected: bool,
    source: Option<SourceHandle>,
    updated: bool,
}

/// State restored when applying a local description fails.
struct PreviousLocal {
    local: Option<SessionInfo>,
    local_type: Option<SdpType>,
    gathering: IceGatheringState,
    end_of_candidates: bool,
}

/// State restored when applying a remote description fails.
struct PreviousRemote {
    remote: Option<SessionInfo>,
    remote_type: Option<SdpType>,
    remote_sources: Vec<RemoteSourceStatus>,
}

struct PendingLocal {
    target: SignalingState,
    done: oneshot::Sender<()>,
}

struct TrackInfo {
    kind: MediaType,
    track_id: String,
    stream_id: String,
    source: Option<SourceHandle>,
}

fn track_infos(streams: &[MediaStream]) -> Vec<TrackInfo> {
    streams
        .iter()
        .flat_map(|stream| {
            stream.tracks.iter().map(move |track| TrackInfo {
                kind: track.kind,
                track_id: track.id.clone(),
                stream_id: stream.id.clone(),
                source: track.source.clone(),
            })
        })
        .collect()
}

/// Matches media lines against local tracks. Matched tracks are removed
/// from `tracks`, leaving the ones that need fresh lines.
fn reconcile_tracks(lines: &mut [MediaDescription], tracks: &mut Vec<TrackInfo>) {
    for mdesc in lines
        .iter_mut()
        .filter(|m| m.media_type != MediaType::Application)
    {
        let matched = mdesc
            .media_stream_track_id
            .as_deref()
            .and_then(|id| tracks.iter().position(|t| t.track_id == id));
        match matched {
            Some(index) => {
                tracks.remove(index);
            }
            None => {
                mdesc.media_stream_id = None;
                mdesc.media_stream_track_id = None;
            }
        }
    }

    for mdesc in lines
        .iter_mut()
        .filter(|m| m.media_type != MediaType::Application)
    {
        if mdesc.media_stream_track_id.is_some() {
            continue;
        }
        match tracks.iter().position(|t| t.kind == mdesc.media_type) {
            Some(index) => {
                let track = tracks.remove(index);
                mdesc.media_stream_id = Some(track.stream_id);
                mdesc.media_stream_track_id = Some(track.track_id);
                mdesc.mode = Some(MediaMode::Sendrecv);
            }
            None => mdesc.mode = Some(MediaMode::Recvonly),
        }
    }
}

struct Session {
    signaling_state: SignalingState,
    ice_gathering_state: IceGatheringState,
    local: Option<SessionInfo>,
    local_type: Option<SdpType>,
    remote: Option<SessionInfo>,
    remote_type: Option<SdpType>,
    remote_sources: Vec<RemoteSourceStatus>,
    local_streams: Vec<MediaStream>,
    remote_streams: Vec<MediaStream>,
    data_channels: Vec<RtcDataChannel>,
    pending_local: Option<PendingLocal>,
    end_of_candidates: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            signaling_state: SignalingState::Stable,
            ice_gathering_state: IceGatheringState::New,
            local: None,
            local_type: None,
            remote: None,
            remote_type: None,
            remote_sources: Vec::new(),
            local_streams: Vec::new(),
            remote_streams: Vec::new(),
            data_channels: Vec::new(),
            pending_local: None,
            end_of_candidates: false,
        }
    }

    fn check_open(&self) -> Result<(), SignalingError> {
        if self.signaling_state == SignalingState::Closed {
            return Err(SignalingError::closed());
        }
        Ok(())
    }

    fn local_line_mut(&mut self, mline: usize) -> Result<&mut MediaDescription, SignalingError> {
        self.local
            .as_mut()
            .and_then(|local| local.media_descriptions.get_mut(mline))
            .ok_or_else(|| SignalingError::Operation(format!("no local media line {}", mline)))
    }

    fn find_stream(&self, id: &str) -> Option<&MediaStream> {
        self.local_streams
            .iter()
            .chain(self.remote_streams.iter())
            .find(|stream| stream.id == id)
    }

    fn needs_negotiation(&self) -> bool {
        let local = self.local.as_ref();
        let track_missing = self
            .local_streams
            .iter()
            .flat_map(|stream| stream.tracks.iter())
            .any(|track| !local.is_some_and(|l| l.has_track(&track.id)));
        let channels_pending = !self.data_channels.is_empty()
            && !local.is_some_and(SessionInfo::has_application_line);
        track_missing || channels_pending
    }

    fn local_complete(&self) -> bool {
        self.local
            .as_ref()
            .is_some_and(SessionInfo::is_locally_complete)
    }
}

struct Inner {
    configuration: Mutex<RtcConfiguration>,
    settings: SignalingConfig,
    codec: Arc<dyn SdpCodec>,
    session: Mutex<Session>,
    queue: OperationQueue,
    handler: watch::Sender<Option<Arc<dyn PeerHandler>>>,
    events: broadcast::Sender<PeerConnectionEvent>,
    negotiation_scheduled: AtomicBool,
}

impl Inner {
    fn emit(&self, event: PeerConnectionEvent) {
        tracing::debug!("Peer connection event: {:?}", event);
        let _ = self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        self.session.lock().signaling_state == SignalingState::Closed
    }

    fn check_open(&self) -> Result<(), SignalingError> {
        self.session.lock().check_open()
    }

    fn set_signaling_state(&self, session: &mut Session, target: SignalingState) {
        if session.signaling_state != target {
            session.signaling_state = target;
            self.emit(PeerConnectionEvent::SignalingStateChange(target));
        }
    }

    fn set_gathering_state(&self, session: &mut Session, target: IceGatheringState) {
        if session.ice_gathering_state != target {
            session.ice_gathering_state = target;
            self.emit(PeerConnectionEvent::IceGatheringStateChange(target));
        }
    }

    /// Waits until a peer handler is attached or the connection closes.
    async fn peer_handler(&self) -> Result<Arc<dyn PeerHandler>, SignalingError> {
        let mut rx = self.handler.subscribe();
        let slot = rx
            .wait_for(|handler| handler.is_some() || self.is_closed())
            .await
            .map_err(|_| SignalingError::Operation("peer handler unavailable".to_string()))?;
        let handler = (*slot).clone();
        handler.ok_or_else(SignalingError::closed)
    }

    fn build_offer(&self, options: RtcOfferOptions) -> Result<RtcSessionDescription, SignalingError> {
        let (mut snapshot, mut tracks, has_channels) = {
            let session = self.session.lock();
            session.check_open()?;
            (
                session.local.clone().unwrap_or_default(),
                track_infos(&session.local_streams),
                !session.data_channels.is_empty(),
            )
        };

        reconcile_tracks(&mut snapshot.media_descriptions, &mut tracks);

        let lines = &mut snapshot.media_descriptions;
        for track in tracks {
            let mut mdesc = MediaDescription::fresh(track.kind, MediaMode::Sendrecv);
            mdesc.media_stream_id = Some(track.stream_id);
            mdesc.media_stream_track_id = Some(track.track_id);
            lines.push(mdesc);
        }
        for _ in 0..options.offer_to_receive_audio {
            lines.push(MediaDescription::fresh(MediaType::Audio, MediaMode::Recvonly));
        }
        for _ in 0..options.offer_to_receive_video {
            lines.push(MediaDescription::fresh(MediaType::Video, MediaMode::Recvonly));
        }
        if has_channels && !snapshot.has_application_line() {
            snapshot
                .media_descriptions
                .push(MediaDescription::fresh(MediaType::Application, MediaMode::Sendrecv));
        }

        Ok(RtcSessionDescription::new(
            SdpType::Offer,
            self.codec.generate(&snapshot),
        ))
    }

    fn build_answer(&self) -> Result<RtcSessionDescription, SignalingError> {
        let (remote, mut snapshot, mut tracks) = {
            let session = self.session.lock();
            session.check_open()?;
            let remote = session
                .remote
                .clone()
                .ok_or_else(|| SignalingError::InvalidState("no remote description".to_string()))?;
            (
                remote,
                session.local.clone().unwrap_or_default(),
                track_infos(&session.local_streams),
            )
        };

        for (i, rmdesc) in remote.media_descriptions.iter().enumerate() {
            if i >= snapshot.media_descriptions.len() {
                let mut lmdesc = MediaDescription::new(rmdesc.media_type);
                lmdesc.dtls = DtlsInfo::with_setup(DtlsSetup::answering(rmdesc.dtls.setup));
                lmdesc.sctp = rmdesc.sctp.clone();
                snapshot.media_descriptions.push(lmdesc);
            }
            let lmdesc = &mut snapshot.media_descriptions[i];
            lmdesc.payloads = rmdesc.payloads.clone();
            lmdesc.rtcp.mux = rmdesc.rtcp.mux;
            if lmdesc.dtls.setup == Some(DtlsSetup::Actpass) {
                lmdesc.dtls.setup = Some(DtlsSetup::Passive);
            }
        }

        reconcile_tracks(&mut snapshot.media_descriptions, &mut tracks);

        Ok(RtcSessionDescription::new(
            SdpType::Answer,
            self.codec.generate(&snapshot),
        ))
    }

    async fn apply_local(self: Arc<Self>, desc: RtcSessionDescription) -> Result<(), SignalingError> {
        let (target, local, remote, previous, has_new) = {
            let mut session = self.session.lock();
            session.check_open()?;
            let target = transition(session.signaling_state, DescriptionSide::Local, desc.sdp_type)
                .ok_or(SignalingError::InvalidSessionDescription {
                    side: DescriptionSide::Local.as_str(),
                    sdp_type: desc.sdp_type.as_str(),
                    state: session.signaling_state.as_str(),
                })?;
            let local = self.codec.parse(&desc.sdp)?;

            let previous_lines = session
                .local
                .as_ref()
                .map_or(0, |l| l.media_descriptions.len());
            let has_new = local.media_descriptions.len() > previous_lines;
            let previous = PreviousLocal {
                local: session.local.replace(local.clone()),
                local_type: session.local_type.replace(desc.sdp_type),
                gathering: session.ice_gathering_state,
                end_of_candidates: session.end_of_candidates,
            };
            (target, local, session.remote.clone(), previous, has_new)
        };

        let is_initiator = desc.sdp_type == SdpType::Offer;
        let result = self
            .clone()
            .drive_local(target, &local, remote.as_ref(), is_initiator, has_new)
            .await;

        if result.is_err() {
            let mut session = self.session.lock();
            session.pending_local = None;
            if session.signaling_state != SignalingState::Closed {
                session.local = previous.local;
                session.local_type = previous.local_type;
                session.end_of_candidates = previous.end_of_candidates;
                self.set_gathering_state(&mut session, previous.gathering);
            }
        }
        result
    }

    async fn drive_local(
        self: Arc<Self>,
        target: SignalingState,
        local: &SessionInfo,
        remote: Option<&SessionInfo>,
        is_initiator: bool,
        has_new: bool,
    ) -> Result<(), SignalingError> {
        let handler = self.peer_handler().await?;

        let done = if has_new {
            let (done_tx, done_rx) = oneshot::channel();
            let mut session = self.session.lock();
            session.check_open()?;
            session.pending_local = Some(PendingLocal {
                target,
                done: done_tx,
            });
            session.end_of_candidates = false;
            self.set_gathering_state(&mut session, IceGatheringState::Gathering);
            Some(done_rx)
        } else {
            None
        };

        if has_new {
            handler
                .prepare_to_receive(local, is_initiator)
                .map_err(|e| SignalingError::Operation(e.to_string()))?;
        }
        if let Some(remote) = remote {
            handler
                .prepare_to_send(remote, is_initiator)
                .map_err(|e| SignalingError::Operation(e.to_string()))?;
        }

        match done {
            Some(done) => {
                let timeout = self.settings.local_info_timeout;
                match tokio::time::timeout(timeout, done).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SignalingError::closed()),
                    Err(_) => {
                        tracing::warn!(
                            "Local session info incomplete after {:?}, giving up",
                            timeout
                        );
                        Err(SignalingError::Timeout(timeout.as_millis() as u64))
                    }
                }
            }
            None => {
                let mut session = self.session.lock();
                session.check_open()?;
                self.set_signaling_state(&mut session, target);
                Ok(())
            }
        }
    }

    async fn apply_remote(self: Arc<Self>, desc: RtcSessionDescription) -> Result<(), SignalingError> {
        let (target, remote, previous) = {
            let mut session = self.session.lock();
            session.check_open()?;
            let target = transition(
                session.signaling_state,
                DescriptionSide::Remote,
                desc.sdp_type,
            )
            .ok_or(SignalingError::InvalidSessionDescription {
                side: DescriptionSide::Remote.as_str(),
                sdp_type: desc.sdp_type.as_str(),
                state: session.signaling_state.as_str(),
            })?;
            let mut remote = self.codec.parse(&desc.sdp)?;

            let previous_sources = session.remote_sources.clone();
            let mut remote_sources = session.remote_sources.clone();
            let mut tracks = track_infos(&session.local_streams);
            for (i, mdesc) in remote.media_descriptions.iter_mut().enumerate() {
                if remote_sources.len() <= i {
                    remote_sources.resize_with(i + 1, Default::default);
                }
                remote_sources[i].expected = mdesc.expects_source();

                if mdesc.ice.is_none() {
                    tracing::warn!("Remote media line {} is missing ICE credentials", i);
                    mdesc.ice = Some(IceInfo::default());
                }

                let supported = default_payloads(mdesc.media_type);
                mdesc.payloads.retain(|payload| {
                    supported
                        .iter()
                        .any(|s| s.encoding_name.eq_ignore_ascii_case(&payload.encoding_name))
                });

                if let Some(index) = tracks.iter().position(|t| t.kind == mdesc.media_type) {
                    mdesc.source = tracks.remove(index).source;
                }
            }

            session.remote_sources = remote_sources;
            let previous = PreviousRemote {
                remote: session.remote.replace(remote.clone()),
                remote_type: session.remote_type.replace(desc.sdp_type),
                remote_sources: previous_sources,
            };
            (target, remote, previous)
        };

        let result = self
            .clone()
            .drive_remote(target, &remote, desc.sdp_type == SdpType::Answer)
            .await;

        if result.is_err() {
            let mut session = self.session.lock();
            if session.signaling_state != SignalingState::Closed {
                session.remote = previous.remote;
                session.remote_type = previous.remote_type;
                session.remote_sources = previous.remote_sources;
            }
        }
        result
    }

    async fn drive_remote(
        self: Arc<Self>,
        target: SignalingState,
        remote: &SessionInfo,
        is_initiator: bool,
    ) -> Result<(), SignalingError> {
        let handler = self.peer_handler().await?;
        handler
            .prepare_to_send(remote, is_initiator)
            .map_err(|e| SignalingError::Operation(e.to_string()))?;

        let mut session = self.session.lock();
        session.check_open()?;
        self.set_signaling_state(&mut session, target);
        Ok(())
    }

    async fn apply_candidate(self: Arc<Self>, candidate: RtcIceCandidate) -> Result<(), SignalingError> {
        let (parsed, ufrag, password) = {
            let session = self.session.lock();
            session.check_open()?;
            let remote = session
                .remote
                .as_ref()
                .ok_or_else(|| SignalingError::InvalidState("no remote description".to_string()))?;
            let parsed = parse_candidate(&candidate.candidate)?;
            let mdesc = remote
                .media_descriptions
                .get(candidate.sdp_m_line_index)
                .ok_or_else(|| {
                    SignalingError::Syntax(format!(
                        "unknown media line index {}",
                        candidate.sdp_m_line_index
                    ))
                })?;
            let ice = mdesc.ice.clone().unwrap_or_default();
            (parsed, ice.ufrag, ice.password)
        };

        let handler = self.peer_handler().await?;
        handler
            .add_remote_candidate(
                &parsed,
                candidate.sdp_m_line_index,
                ufrag.as_deref(),
                password.as_deref(),
            )
            .map_err(|e| SignalingError::Operation(e.to_string()))
    }

    /// Re-checks local completeness after the engine supplied a parameter.
    fn local_updated(&self, session: &mut Session, candidate: Option<(&IceCandidate, usize)>) {
        if !session.local_complete() {
            return;
        }
        match session.pending_local.take() {
            Some(pending) => {
                if session.signaling_state != SignalingState::Closed {
                    self.set_signaling_state(session, pending.target);
                }
                let _ = pending.done.send(());
                self.gathering_done(session);
            }
            None => {
                if let Some((candidate, mline)) = candidate {
                    self.emit(PeerConnectionEvent::IceCandidate(Some(RtcIceCandidate::new(
                        format_candidate(candidate),
                        mline,
                    ))));
                }
            }
        }
    }

    /// Signals end of candidates once every line finished gathering.
    fn gathering_done(&self, session: &mut Session) {
        let all_done = session
            .local
            .as_ref()
            .is_some_and(SessionInfo::all_gathering_done);
        if !all_done || !session.local_complete() || session.end_of_candidates {
            return;
        }
        session.end_of_candidates = true;
        self.emit(PeerConnectionEvent::IceCandidate(None));
        self.set_gathering_state(session, IceGatheringState::Complete);
    }

    fn maybe_negotiation_needed(self: &Arc<Self>) {
        if !self.queue.is_empty() {
            return;
        }
        {
            let session = self.session.lock();
            if session.signaling_state != SignalingState::Stable || !session.needs_negotiation() {
                return;
            }
        }
        if self.negotiation_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.negotiation_scheduled.store(false, Ordering::SeqCst);
            let stable = inner.session.lock().signaling_state == SignalingState::Stable;
            if stable && inner.queue.is_empty() {
                inner.emit(PeerConnectionEvent::NegotiationNeeded);
            }
        });
    }
}

/// A peer connection backed by a bridge peer handler.
///
/// Cloning yields another handle to the same connection. Must be created
/// inside a tokio runtime.
#[derive(Clone)]
pub struct PeerConnection {
    inner: Arc<Inner>,
}

impl PeerConnection {
    pub fn new(
        configuration: RtcConfiguration,
        codec: Arc<dyn SdpCodec>,
        settings: SignalingConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (handler, _) = watch::channel(None);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let drained = weak.clone();
            Inner {
                configuration: Mutex::new(configuration),
                settings,
                codec,
                session: Mutex::new(Session::new()),
                queue: OperationQueue::new(move || {
                    if let Some(inner) = drained.upgrade() {
                        inner.maybe_negotiation_needed();
                    }
                }),
                handler,
                events,
                negotiation_scheduled: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    /// Supplies the bridge-side handler. Queued operations waiting for it
    /// resume.
    pub fn attach_peer_handler(&self, handler: Arc<dyn PeerHandler>) {
        if self.inner.is_closed() {
            if let Err(e) = handler.stop() {
                tracing::warn!("Failed to stop peer handler: {}", e);
            }
            return;
        }
        self.inner.handler.send_replace(Some(handler));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerConnectionEvent> {
        self.inner.events.subscribe()
    }

    fn queued<F, Fut, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, SignalingError>> + Send + 'static
    where
        F: FnOnce(Arc<Inner>) -> Fut,
        Fut: Future<Output = Result<T, SignalingError>> + Send + 'static,
        T: Send + 'static,
    {
        let queued = self
            .inner
            .check_open()
            .map(|()| self.inner.queue.enqueue(operation(self.inner.clone())));
        async move { queued?.await }
    }

    pub fn create_offer(
        &self,
        options: RtcOfferOptions,
    ) -> impl Future<Output = Result<RtcSessionDescription, SignalingError>> + Send + 'static {
        self.queued(move |inner| async move { inner.build_offer(options) })
    }

    pub fn create_answer(
        &self,
    ) -> impl Future<Output = Result<RtcSessionDescription, SignalingError>> + Send + 'static {
        self.queued(|inner| async move { inner.build_answer() })
    }

    /// Completes once the engine supplied every parameter new lines need.
    pub fn set_local_description(
        &self,
        description: RtcSessionDescription,
    ) -> impl Future<Output = Result<(), SignalingError>> + Send + 'static {
        self.queued(move |inner| inner.apply_local(description))
    }

    pub fn set_remote_description(
        &self,
        description: RtcSessionDescription,
    ) -> impl Future<Output = Result<(), SignalingError>> + Send + 'static {
        self.queued(move |inner| inner.apply_remote(description))
    }

    pub fn add_ice_candidate(
        &self,
        candidate: RtcIceCandidate,
    ) -> impl Future<Output = Result<(), SignalingError>> + Send + 'static {
        self.queued(move |inner| inner.apply_candidate(candidate))
    }

    /// Replaces the configuration used for future helper servers.
    pub fn update_ice(&self, configuration: RtcConfiguration) -> Result<(), SignalingError> {
        self.inner.check_open()?;
        *self.inner.configuration.lock() = configuration;
        Ok(())
    }

    pub fn get_configuration(&self) -> RtcConfiguration {
        self.inner.configuration.lock().clone()
    }

    /// Moves to `closed` and stops the peer handler. Idempotent.
    pub fn close(&self) {
        {
            let mut session = self.inner.session.lock();
            if session.signaling_state == SignalingState::Closed {
                return;
            }
            session.pending_local = None;
            self.inner
                .set_signaling_state(&mut session, SignalingState::Closed);
        }
        // Wakes operations waiting for a handler
        self.inner.handler.send_modify(|_| {});

        let handler = self.inner.handler.borrow().clone();
        if let Some(handler) = handler {
            if let Err(e) = handler.stop() {
                tracing::warn!("Failed to stop peer handler: {}", e);
            }
        }
    }

    pub fn add_stream(&self, stream: MediaStream) -> Result<(), SignalingError> {
        {
            let mut session = self.inner.session.lock();
            session.check_open()?;
            if session.find_stream(&stream.id).is_some() {
                return Ok(());
            }
            session.local_streams.push(stream);
        }
        self.inner.maybe_negotiation_needed();
        Ok(())
    }

    pub fn remove_stream(&self, stream_id: &str) -> Result<(), SignalingError> {
        {
            let mut session = self.inner.session.lock();
            session.check_open()?;
            let Some(index) = session.local_streams.iter().position(|s| s.id == stream_id) else {
                return Ok(());
            };
            session.local_streams.remove(index);
        }
        self.inner.maybe_negotiation_needed();
        Ok(())
    }

    pub fn create_data_channel(&self, label: &str) -> Result<RtcDataChannel, SignalingError> {
        let channel = {
            let mut session = self.inner.session.lock();
            session.check_open()?;
            let id = u16::try_from(session.data_channels.len()).map_err(|_| {
                SignalingError::Operation("no data channel ids left".to_string())
            })?;
            let channel = RtcDataChannel {
                id,
                label: label.to_string(),
            };
            session.data_channels.push(channel.clone());
            channel
        };
        self.inner.maybe_negotiation_needed();
        Ok(channel)
    }

    pub fn get_local_streams(&self) -> Vec<MediaStream> {
        self.inner.session.lock().local_streams.clone()
    }

    pub fn get_remote_streams(&self) -> Vec<MediaStream> {
        self.inner.session.lock().remote_streams.clone()
    }

    /// Searches local streams, then remote streams.
    pub fn get_stream_by_id(&self, id: &str) -> Option<MediaStream> {
        self.inner.session.lock().find_stream(id).cloned()
    }

    pub fn local_description(&self) -> Option<RtcSessionDescription> {
        let session = self.inner.session.lock();
        let local = session.local.as_ref()?;
        Some(RtcSessionDescription::new(
            session.local_type.unwrap_or(SdpType::Offer),
            self.inner.codec.generate(local),
        ))
    }

    pub fn remote_description(&self) -> Option<RtcSessionDescription> {
        let session = self.inner.session.lock();
        let remote = session.remote.as_ref()?;
        Some(RtcSessionDescription::new(
            session.remote_type.unwrap_or(SdpType::Offer),
            self.inner.codec.generate(remote),
        ))
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.inner.session.lock().signaling_state
    }

    pub fn ice_gathering_state(&self) -> IceGatheringState {
        self.inner.session.lock().ice_gathering_state
    }

    /// Operations queued or running.
    pub fn pending_operations(&self) -> usize {
        self.inner.queue.len()
    }
}

impl PeerHandlerClient for PeerConnection {
    fn got_send_ssrc(&self, mline: usize, ssrc: u32, cname: &str) -> Result<(), SignalingError> {
        let mut session = self.inner.session.lock();
        let mdesc = session.local_line_mut(mline)?;
        mdesc.ssrcs.get_or_insert_with(Vec::new).push(ssrc);
        mdesc.cname = Some(cname.to_string());
        self.inner.local_updated(&mut session, None);
        Ok(())
    }

    fn got_dtls_fingerprint(
        &self,
        mline: usize,
        fingerprint: DtlsFingerprint,
    ) -> Result<(), SignalingError> {
        let mut session = self.inner.session.lock();
        let mdesc = session.local_line_mut(mline)?;
        mdesc.dtls.fingerprint_hash_function = Some(fingerprint.fingerprint_hash_function);
        mdesc.dtls.fingerprint = Some(fingerprint.fingerprint);
        self.inner.local_updated(&mut session, None);
        Ok(())
    }

    fn got_ice_candidate(
        &self,
        mline: usize,
        candidate: IceCandidate,
        ufrag: &str,
        password: &str,
    ) -> Result<(), SignalingError> {
        let mut session = self.inner.session.lock();
        let mdesc = session.local_line_mut(mline)?;

        let ice = mdesc.ice.get_or_insert_with(IceInfo::default);
        ice.ufrag.get_or_insert_with(|| ufrag.to_string());
        ice.password.get_or_insert_with(|| password.to_string());
        ice.candidates.push(candidate.clone());

        if !candidate.is_ipv6() {
            if candidate.is_rtp() {
                if mdesc.address.as_deref().map_or(true, |a| a == "0.0.0.0") {
                    mdesc.address = Some(candidate.address.clone());
                    mdesc.port = Some(candidate.port);
                }
            } else if mdesc.rtcp.address.is_none() || mdesc.rtcp.port.is_none() {
                mdesc.rtcp.address = Some(candidate.address.clone());
                mdesc.rtcp.port = Some(candidate.port);
            }
        }

        self.inner
            .local_updated(&mut session, Some((&candidate, mline)));
        Ok(())
    }

    fn candidate_gathering_done(&self, mline: usize) -> Result<(), SignalingError> {
        let mut session = self.inner.session.lock();
        let mdesc = session.local_line_mut(mline)?;
        mdesc.ice.get_or_insert_with(IceInfo::default).gathering_done = true;
        self.inner.gathering_done(&mut session);
        Ok(())
    }

    fn got_remote_source(&self, mline: usize, source: SourceHandle) -> Result<(), SignalingError> {
        let mut session = self.inner.session.lock();
        if session.remote_sources.len() <= mline {
            session.remote_sources.resize_with(mline + 1, Default::default);
        }
        let status = &mut session.remote_sources[mline];
        status.source = Some(source);
        status.updated = true;

        if session
            .remote_sources
            .iter()
            .any(|status| status.expected && status.source.is_none())
        {
            return Ok(());
        }
        let Some(remote) = session.remote.clone() else {
            return Err(SignalingError::InvalidState(
                "remote source without remote description".to_string(),
            ));
        };

        let mut grouped: Vec<(String, Vec<MediaStreamTrack>)> = Vec::new();
        let mut ungrouped = Vec::new();
        for (i, status) in session.remote_sources.iter_mut().enumerate() {
            if !status.updated {
                continue;
            }
            status.updated = false;
            let (Some(mdesc), Some(source)) = (remote.media_descriptions.get(i), &status.source)
            else {
                continue;
            };

            let label = format!("Remote {} source", mdesc.media_type.as_str());
            let mut track = MediaStreamTrack::new(mdesc.media_type, label).with_source(source.clone());
            if let Some(id) = &mdesc.media_stream_track_id {
                track = track.with_id(id.clone());
            }
            match &mdesc.media_stream_id {
                Some(stream_id) => match grouped.iter_mut().find(|(id, _)| id == stream_id) {
                    Some((_, tracks)) => tracks.push(track),
                    None => grouped.push((stream_id.clone(), vec![track])),
                },
                None => ungrouped.push(track),
            }
        }

        let mut streams: Vec<MediaStream> = grouped
            .into_iter()
            .map(|(id, tracks)| MediaStream::with_id(id, tracks))
            .collect();
        if !ungrouped.is_empty() {
            streams.push(MediaStream::new(ungrouped));
        }
        for stream in streams {
            tracing::debug!("Remote stream {} ({} tracks)", stream.id, stream.tracks.len());
            session.remote_streams.push(stream.clone());
            self.inner.emit(PeerConnectionEvent::AddStream(stream));
        }
        Ok(())
    }
}
