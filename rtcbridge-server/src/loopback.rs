//! Engine that gathers loopback candidates and moves no media.
//!
//! Lets the bridge run end to end without a native stack. Every session
//! reports an SSRC, a throwaway certificate and one host candidate per
//! component, and produces a remote source once the peer's first candidate
//! arrives.

use crate::engine::{
    CodecPayload, ComponentType, HelperServer, MediaEngine, MediaSession, MediaSource,
    NativeCandidate, SessionEvent, SessionObserver, TransportAgent, TransportType,
};
use crate::error::ServerError;
use base64::Engine as _;
use parking_lot::Mutex;
use rtcbridge_core::{CandidateType, MediaType};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};

const FIRST_PORT: u16 = 40000;

#[derive(Debug)]
pub struct LoopbackSource {
    media_type: MediaType,
    name: String,
}

impl LoopbackSource {
    pub fn new(media_type: MediaType, name: impl Into<String>) -> Self {
        Self {
            media_type,
            name: name.into(),
        }
    }
}

impl MediaSource for LoopbackSource {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[derive(Default)]
struct SessionState {
    observer: Option<SessionObserver>,
    rtcp_mux: bool,
    media_type: Option<MediaType>,
    send_payload: Option<CodecPayload>,
    sending: bool,
    remote_candidates: usize,
    source_reported: bool,
}

pub struct LoopbackSession {
    dtls_client_mode: bool,
    ufrag: String,
    password: String,
    state: Mutex<SessionState>,
}

impl LoopbackSession {
    fn new(dtls_client_mode: bool) -> Self {
        let credentials = uuid::Uuid::new_v4().simple().to_string();
        Self {
            dtls_client_mode,
            ufrag: credentials[..8].to_string(),
            password: credentials[8..].to_string(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn dtls_client_mode(&self) -> bool {
        self.dtls_client_mode
    }

    pub fn is_sending(&self) -> bool {
        self.state.lock().sending
    }

    /// Codec configured for sending.
    pub fn send_codec(&self) -> Option<String> {
        self.state
            .lock()
            .send_payload
            .as_ref()
            .map(|payload| payload.codec.clone())
    }

    fn emit(&self, event: SessionEvent) {
        let observer = self.state.lock().observer.clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }

    /// Reports the remote source once a peer candidate arrived and someone listens.
    fn report_source(&self) {
        let media_type = {
            let mut state = self.state.lock();
            if state.source_reported || state.remote_candidates == 0 || state.observer.is_none() {
                return;
            }
            state.source_reported = true;
            state.media_type.unwrap_or(MediaType::Audio)
        };
        let name = format!("Loopback remote {}", media_type.as_str());
        self.emit(SessionEvent::IncomingSource(Arc::new(LoopbackSource::new(
            media_type, name,
        ))));
    }

    fn candidate(&self, component: ComponentType, port: u16) -> NativeCandidate {
        NativeCandidate {
            candidate_type: CandidateType::Host,
            component,
            transport: TransportType::Udp,
            address: "127.0.0.1".to_string(),
            port,
            base_address: String::new(),
            base_port: 0,
            priority: 2130706431 - u32::from(component.id()),
            foundation: "1".to_string(),
            ufrag: self.ufrag.clone(),
            password: self.password.clone(),
        }
    }

    fn gather(&self, port: u16) {
        self.emit(SessionEvent::SendSsrc {
            ssrc: rand::random(),
            cname: uuid::Uuid::new_v4().simple().to_string(),
        });
        self.emit(SessionEvent::DtlsCertificate(throwaway_certificate()));

        self.emit(SessionEvent::IceCandidate(
            self.candidate(ComponentType::Rtp, port),
        ));
        if !self.state.lock().rtcp_mux {
            self.emit(SessionEvent::IceCandidate(
                self.candidate(ComponentType::Rtcp, port + 1),
            ));
        }
        self.emit(SessionEvent::CandidateGatheringDone);
    }
}

fn throwaway_certificate() -> String {
    let der: [u8; 32] = rand::random();
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        base64::engine::general_purpose::STANDARD.encode(der)
    )
}

impl MediaSession for LoopbackSession {
    fn set_observer(&self, observer: SessionObserver) {
        self.state.lock().observer = Some(observer);
        self.report_source();
    }

    fn set_rtcp_mux(&self, enabled: bool) {
        self.state.lock().rtcp_mux = enabled;
    }

    fn rtcp_mux(&self) -> bool {
        self.state.lock().rtcp_mux
    }

    fn add_receive_payload(&self, payload: CodecPayload) {
        self.state.lock().media_type.get_or_insert(payload.media_type);
    }

    fn set_send_payload(&self, payload: CodecPayload) {
        let mut state = self.state.lock();
        state.media_type.get_or_insert(payload.media_type);
        state.send_payload = Some(payload);
    }

    fn set_send_source(&self, source: Arc<dyn MediaSource>) {
        tracing::debug!("Loopback session sending {}", source.name());
        self.state.lock().sending = true;
    }

    fn add_remote_candidate(&self, _candidate: NativeCandidate) {
        self.state.lock().remote_candidates += 1;
        self.report_source();
    }
}

type SessionList = Arc<Mutex<Vec<Weak<LoopbackSession>>>>;

pub struct LoopbackAgent {
    sessions: SessionList,
    helpers: Mutex<Vec<HelperServer>>,
    controlling: AtomicBool,
    stopped: AtomicBool,
    next_port: AtomicU16,
}

impl LoopbackAgent {
    pub fn helper_servers(&self) -> Vec<HelperServer> {
        self.helpers.lock().clone()
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    /// The concrete session behind a trait object this engine created.
    fn find(&self, session: &Arc<dyn MediaSession>) -> Option<Arc<LoopbackSession>> {
        let wanted = Arc::as_ptr(session) as *const ();
        self.sessions
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|candidate| Arc::as_ptr(candidate) as *const () == wanted)
    }
}

impl TransportAgent for LoopbackAgent {
    fn add_helper_server(&self, server: &HelperServer) {
        self.helpers.lock().push(server.clone());
    }

    fn set_ice_controlling_mode(&self, controlling: bool) {
        self.controlling.store(controlling, Ordering::SeqCst);
    }

    /// Gathers on a spawned task, as a native agent would.
    fn add_session(&self, session: Arc<dyn MediaSession>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(session) = self.find(&session) else {
            tracing::warn!("Loopback agent given a foreign media session");
            return;
        };
        let port = FIRST_PORT.wrapping_add(self.next_port.fetch_add(2, Ordering::SeqCst));
        tokio::spawn(async move {
            session.gather(port);
        });
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// The loopback [`MediaEngine`].
#[derive(Default)]
pub struct LoopbackEngine {
    sessions: SessionList,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaEngine for LoopbackEngine {
    fn create_transport_agent(&self) -> Result<Arc<dyn TransportAgent>, ServerError> {
        Ok(Arc::new(LoopbackAgent {
            sessions: self.sessions.clone(),
            helpers: Mutex::new(Vec::new()),
            controlling: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            next_port: AtomicU16::new(0),
        }))
    }

    fn create_media_session(
        &self,
        dtls_client_mode: bool,
    ) -> Result<Arc<dyn MediaSession>, ServerError> {
        let session = Arc::new(LoopbackSession::new(dtls_client_mode));
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&session));
        Ok(session)
    }

    fn capture_sources(&self, media_types: &[MediaType]) -> Vec<Arc<dyn MediaSource>> {
        let devices = [
            (MediaType::Audio, "Loopback microphone"),
            (MediaType::Video, "Loopback front camera"),
            (MediaType::Video, "Loopback rear camera"),
        ];
        devices
            .into_iter()
            .filter(|(media_type, _)| media_types.contains(media_type))
            .map(|(media_type, name)| {
                Arc::new(LoopbackSource::new(media_type, name)) as Arc<dyn MediaSource>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recording(session: &Arc<dyn MediaSession>) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        session.set_observer(Arc::new(move |event| {
            let _ = tx.send(event);
        }));
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_session_gathers_after_add() {
        let engine = LoopbackEngine::new();
        let agent = engine.create_transport_agent().unwrap();
        let session = engine.create_media_session(true).unwrap();
        let mut events = recording(&session);

        agent.add_session(session.clone());
        assert!(matches!(next(&mut events).await, SessionEvent::SendSsrc { .. }));
        match next(&mut events).await {
            SessionEvent::DtlsCertificate(pem) => {
                assert!(crate::engine::fingerprint(&pem).is_ok())
            }
            other => panic!("unexpected {:?}", other),
        }
        let rtp = match next(&mut events).await {
            SessionEvent::IceCandidate(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(rtp.component, ComponentType::Rtp);
        assert_eq!(rtp.port, FIRST_PORT);
        // No rtcp-mux, so RTCP gets its own candidate
        match next(&mut events).await {
            SessionEvent::IceCandidate(c) => assert_eq!(c.port, FIRST_PORT + 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            next(&mut events).await,
            SessionEvent::CandidateGatheringDone
        ));
    }

    #[tokio::test]
    async fn test_first_remote_candidate_yields_source() {
        let engine = LoopbackEngine::new();
        let session = engine.create_media_session(false).unwrap();
        let mut events = recording(&session);

        let rtp = LoopbackSession::new(false).candidate(ComponentType::Rtp, 1);
        session.add_remote_candidate(rtp.clone());
        session.add_remote_candidate(rtp);
        match next(&mut events).await {
            SessionEvent::IncomingSource(source) => {
                assert_eq!(source.media_type(), MediaType::Audio)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_source_waits_for_observer() {
        let engine = LoopbackEngine::new();
        let session = engine.create_media_session(false).unwrap();
        session.add_remote_candidate(LoopbackSession::new(false).candidate(ComponentType::Rtp, 1));

        let mut events = recording(&session);
        assert!(matches!(
            next(&mut events).await,
            SessionEvent::IncomingSource(_)
        ));
    }

    #[test]
    fn test_capture_sources_by_type() {
        let engine = LoopbackEngine::new();
        assert_eq!(engine.capture_sources(&[MediaType::Video]).len(), 2);
        let audio = engine.capture_sources(&[MediaType::Audio]);
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].name(), "Loopback microphone");
        assert!(engine.capture_sources(&[]).is_empty());
    }
}
