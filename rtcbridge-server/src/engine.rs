//! Seam to the native media engine.
//!
//! The bridge never touches RTP, ICE or DTLS itself. It configures a
//! [`TransportAgent`] and one [`MediaSession`] per media line, and listens
//! for [`SessionEvent`]s.

use crate::error::ServerError;
use base64::Engine as _;
use rtcbridge_core::{CandidateType, IceCandidate, MediaType, Payload, TcpType};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Port used when an ICE server URL names none.
pub const DEFAULT_HELPER_PORT: u16 = 3478;

/// Kind of STUN/TURN helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperServerType {
    Stun,
    TurnUdp,
    TurnTcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperServer {
    pub server_type: HelperServerType,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: String,
}

/// Parses `stun|turn:host[:port][?transport=udp|tcp]`.
///
/// Returns `None` for URLs of any other form. Trailing text is ignored.
pub fn parse_helper_server(url: &str, username: &str, credential: &str) -> Option<HelperServer> {
    let (scheme, rest) = url.split_once(':')?;
    if scheme != "stun" && scheme != "turn" {
        return None;
    }

    let host_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    if host_len == 0 {
        return None;
    }
    let (address, mut rest) = rest.split_at(host_len);

    if let Some(stripped) = rest.strip_prefix(':') {
        rest = stripped;
    }
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let port = match rest[..digits].parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => DEFAULT_HELPER_PORT,
    };
    rest = &rest[digits..];

    let server_type = if scheme == "stun" {
        HelperServerType::Stun
    } else if rest.starts_with("?transport=tcp") {
        HelperServerType::TurnTcp
    } else {
        HelperServerType::TurnUdp
    };

    Some(HelperServer {
        server_type,
        address: address.to_string(),
        port,
        username: username.to_string(),
        credential: credential.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Rtp,
    Rtcp,
}

impl ComponentType {
    pub fn from_id(id: u8) -> Self {
        if id == 2 {
            ComponentType::Rtcp
        } else {
            ComponentType::Rtp
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            ComponentType::Rtp => 1,
            ComponentType::Rtcp => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Udp,
    TcpActive,
    TcpPassive,
    TcpSo,
}

impl TransportType {
    fn from_tcp_type(tcp_type: Option<TcpType>) -> Self {
        match tcp_type {
            None => TransportType::Udp,
            Some(TcpType::Active) => TransportType::TcpActive,
            Some(TcpType::Passive) => TransportType::TcpPassive,
            Some(TcpType::So) => TransportType::TcpSo,
        }
    }

    fn tcp_type(&self) -> Option<TcpType> {
        match self {
            TransportType::Udp => None,
            TransportType::TcpActive => Some(TcpType::Active),
            TransportType::TcpPassive => Some(TcpType::Passive),
            TransportType::TcpSo => Some(TcpType::So),
        }
    }
}

/// Candidate in the engine's terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCandidate {
    pub candidate_type: CandidateType,
    pub component: ComponentType,
    pub transport: TransportType,
    pub address: String,
    pub port: u16,
    pub base_address: String,
    pub base_port: u16,
    pub priority: u32,
    pub foundation: String,
    pub ufrag: String,
    pub password: String,
}

impl NativeCandidate {
    /// Builds the engine form of a remote candidate.
    pub fn from_remote(candidate: &IceCandidate, ufrag: &str, password: &str) -> Self {
        Self {
            candidate_type: candidate.candidate_type,
            component: ComponentType::from_id(candidate.component_id),
            transport: TransportType::from_tcp_type(candidate.tcp_type),
            address: candidate.address.clone(),
            port: candidate.port,
            base_address: candidate.related_address.clone().unwrap_or_default(),
            base_port: candidate.related_port.unwrap_or(0),
            priority: candidate.priority,
            foundation: candidate.foundation.clone(),
            ufrag: ufrag.to_string(),
            password: password.to_string(),
        }
    }

    /// Structured form reported to the page.
    ///
    /// Port 0 is reported as the discard port 9.
    pub fn to_ice_candidate(&self) -> IceCandidate {
        let related = self.candidate_type != CandidateType::Host;
        IceCandidate {
            foundation: self.foundation.clone(),
            component_id: self.component.id(),
            transport: match self.transport {
                TransportType::Udp => "UDP",
                _ => "TCP",
            }
            .to_string(),
            priority: self.priority,
            address: self.address.clone(),
            port: or_discard(self.port),
            candidate_type: self.candidate_type,
            related_address: related.then(|| self.base_address.clone()),
            related_port: related.then(|| or_discard(self.base_port)),
            tcp_type: self.transport.tcp_type(),
        }
    }
}

fn or_discard(port: u16) -> u16 {
    if port == 0 {
        9
    } else {
        port
    }
}

/// Codec payload as configured on a media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPayload {
    pub media_type: MediaType,
    pub payload_type: u8,
    /// Upper-cased encoding name.
    pub codec: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub ccm_fir: bool,
    pub nack_pli: bool,
}

impl CodecPayload {
    pub fn new(media_type: MediaType, payload: &Payload) -> Self {
        let video = media_type == MediaType::Video;
        Self {
            media_type,
            payload_type: payload.payload_type,
            codec: payload.encoding_name.to_ascii_uppercase(),
            clock_rate: payload.clock_rate,
            channels: if video { None } else { payload.channels },
            ccm_fir: video && payload.ccmfir,
            nack_pli: video && payload.nackpli,
        }
    }
}

/// Notification from a media session.
pub enum SessionEvent {
    SendSsrc { ssrc: u32, cname: String },
    /// PEM-encoded local certificate.
    DtlsCertificate(String),
    IceCandidate(NativeCandidate),
    CandidateGatheringDone,
    IncomingSource(Arc<dyn MediaSource>),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::SendSsrc { ssrc, cname } => f
                .debug_struct("SendSsrc")
                .field("ssrc", ssrc)
                .field("cname", cname)
                .finish(),
            SessionEvent::DtlsCertificate(_) => f.write_str("DtlsCertificate"),
            SessionEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            SessionEvent::CandidateGatheringDone => f.write_str("CandidateGatheringDone"),
            SessionEvent::IncomingSource(s) => {
                f.debug_tuple("IncomingSource").field(&s.name()).finish()
            }
        }
    }
}

pub type SessionObserver = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Native media engine.
pub trait MediaEngine: Send + Sync + 'static {
    fn create_transport_agent(&self) -> Result<Arc<dyn TransportAgent>, ServerError>;

    fn create_media_session(&self, dtls_client_mode: bool)
        -> Result<Arc<dyn MediaSession>, ServerError>;

    /// Capture devices of the given kinds.
    fn capture_sources(&self, media_types: &[MediaType]) -> Vec<Arc<dyn MediaSource>>;
}

/// ICE agent shared by the sessions of one peer connection.
pub trait TransportAgent: Send + Sync {
    fn add_helper_server(&self, server: &HelperServer);
    fn set_ice_controlling_mode(&self, controlling: bool);
    /// Starts gathering for `session`.
    fn add_session(&self, session: Arc<dyn MediaSession>);
    fn stop(&self);
}

pub trait MediaSession: Send + Sync {
    fn set_observer(&self, observer: SessionObserver);
    fn set_rtcp_mux(&self, enabled: bool);
    fn rtcp_mux(&self) -> bool;
    fn add_receive_payload(&self, payload: CodecPayload);
    fn set_send_payload(&self, payload: CodecPayload);
    fn set_send_source(&self, source: Arc<dyn MediaSource>);
    fn add_remote_candidate(&self, candidate: NativeCandidate);
}

/// Capture device or decoded incoming media.
pub trait MediaSource: Send + Sync {
    fn media_type(&self) -> MediaType;
    fn name(&self) -> String;
}

/// SHA-256 fingerprint of a PEM certificate, as upper-case colon-separated hex.
pub fn fingerprint(pem: &str) -> Result<String, ServerError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let der = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| ServerError::Engine(format!("invalid certificate: {}", e)))?;

    let digest = Sha256::digest(&der);
    let hex = hex::encode_upper(digest);
    let pairs: Vec<&str> = hex
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();
    Ok(pairs.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helper_servers() {
        let stun = parse_helper_server("stun:stun.example.org", "", "").unwrap();
        assert_eq!(stun.server_type, HelperServerType::Stun);
        assert_eq!(stun.address, "stun.example.org");
        assert_eq!(stun.port, DEFAULT_HELPER_PORT);

        let turn = parse_helper_server("turn:10.0.0.1:5349?transport=tcp", "u", "p").unwrap();
        assert_eq!(turn.server_type, HelperServerType::TurnTcp);
        assert_eq!(turn.port, 5349);
        assert_eq!((turn.username.as_str(), turn.credential.as_str()), ("u", "p"));

        let udp = parse_helper_server("turn:relay-1.example.org:3479", "", "").unwrap();
        assert_eq!(udp.server_type, HelperServerType::TurnUdp);
        assert_eq!(udp.port, 3479);

        let no_port = parse_helper_server("turn:relay?transport=tcp", "", "").unwrap();
        assert_eq!(no_port.server_type, HelperServerType::TurnTcp);
        assert_eq!(no_port.port, DEFAULT_HELPER_PORT);

        assert!(parse_helper_server("turns:relay.example.org", "", "").is_none());
        assert!(parse_helper_server("stun:", "", "").is_none());
        assert!(parse_helper_server("http://example.org", "", "").is_none());
    }

    fn remote(tcp_type: Option<TcpType>) -> IceCandidate {
        IceCandidate {
            foundation: "1".to_string(),
            component_id: 2,
            transport: "TCP".to_string(),
            priority: 100,
            address: "192.0.2.5".to_string(),
            port: 4000,
            candidate_type: CandidateType::Host,
            related_address: None,
            related_port: None,
            tcp_type,
        }
    }

    #[test]
    fn test_remote_candidate_mapping() {
        let native = NativeCandidate::from_remote(&remote(Some(TcpType::Passive)), "uf", "pw");
        assert_eq!(native.component, ComponentType::Rtcp);
        assert_eq!(native.transport, TransportType::TcpPassive);
        assert_eq!(native.base_address, "");
        assert_eq!(native.base_port, 0);
        assert_eq!(native.ufrag, "uf");

        let udp = NativeCandidate::from_remote(&remote(None), "", "");
        assert_eq!(udp.transport, TransportType::Udp);
    }

    #[test]
    fn test_local_candidate_report() {
        let native = NativeCandidate {
            candidate_type: CandidateType::Srflx,
            component: ComponentType::Rtp,
            transport: TransportType::Udp,
            address: "198.51.100.7".to_string(),
            port: 0,
            base_address: "10.0.0.2".to_string(),
            base_port: 0,
            priority: 1686052607,
            foundation: "2".to_string(),
            ufrag: String::new(),
            password: String::new(),
        };
        let candidate = native.to_ice_candidate();
        assert_eq!(candidate.transport, "UDP");
        assert_eq!(candidate.port, 9);
        assert_eq!(candidate.related_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(candidate.related_port, Some(9));
        assert_eq!(candidate.tcp_type, None);

        let host = NativeCandidate {
            candidate_type: CandidateType::Host,
            transport: TransportType::TcpSo,
            ..native
        }
        .to_ice_candidate();
        assert_eq!(host.transport, "TCP");
        assert_eq!(host.tcp_type, Some(TcpType::So));
        assert_eq!(host.related_address, None);
        assert_eq!(host.related_port, None);
    }

    #[test]
    fn test_codec_payload_by_media_type() {
        let payload = Payload {
            payload_type: 100,
            encoding_name: "vp8".to_string(),
            clock_rate: 90000,
            channels: Some(1),
            ccmfir: true,
            nackpli: false,
        };
        let video = CodecPayload::new(MediaType::Video, &payload);
        assert_eq!(video.codec, "VP8");
        assert!(video.ccm_fir);
        assert!(!video.nack_pli);
        assert_eq!(video.channels, None);

        let audio = CodecPayload::new(MediaType::Audio, &payload);
        assert_eq!(audio.channels, Some(1));
        assert!(!audio.ccm_fir);
    }

    #[test]
    fn test_fingerprint() {
        let pem = "-----BEGIN CERTIFICATE-----\r\nAAEC\r\nAw==\r\n-----END CERTIFICATE-----\r\n";
        let expected: Vec<String> = Sha256::digest([0u8, 1, 2, 3])
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        assert_eq!(fingerprint(pem).unwrap(), expected.join(":"));

        assert!(fingerprint("-----BEGIN CERTIFICATE-----\n@@@\n").is_err());
    }
}
