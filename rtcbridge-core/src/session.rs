//! Structured session descriptions.
//!
//! This is the form exchanged with the bridge and handed to an
//! [`SdpCodec`](crate::SdpCodec). Lines are mutated in place as SSRCs,
//! fingerprints and candidates arrive from the native engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque handle to a media source owned by the bridge.
///
/// On the wire this is an object reference token.
pub type SourceHandle = Value;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Kind of a media line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Application,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Application => "application",
        }
    }
}

/// Direction of a media line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

/// DTLS role negotiation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsSetup {
    Active,
    Passive,
    Actpass,
}

impl DtlsSetup {
    /// Our concrete role given the peer's setup value.
    pub fn answering(remote: Option<DtlsSetup>) -> DtlsSetup {
        match remote {
            Some(DtlsSetup::Active) => DtlsSetup::Passive,
            _ => DtlsSetup::Active,
        }
    }
}

/// One codec payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ccmfir: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nackpli: bool,
}

impl Payload {
    fn audio(name: &str, payload_type: u8, clock_rate: u32, channels: u8) -> Self {
        Self {
            payload_type,
            encoding_name: name.to_string(),
            clock_rate,
            channels: Some(channels),
            ccmfir: false,
            nackpli: false,
        }
    }

    fn video(name: &str, payload_type: u8) -> Self {
        Self {
            payload_type,
            encoding_name: name.to_string(),
            clock_rate: 90000,
            channels: None,
            ccmfir: true,
            nackpli: true,
        }
    }
}

/// Codecs offered on fresh lines, and the set remote payloads are filtered
/// against.
pub fn default_payloads(media_type: MediaType) -> Vec<Payload> {
    match media_type {
        MediaType::Audio => vec![
            Payload::audio("OPUS", 111, 48000, 2),
            Payload::audio("PCMA", 8, 8000, 1),
            Payload::audio("PCMU", 0, 8000, 1),
        ],
        MediaType::Video => vec![Payload::video("H264", 103), Payload::video("VP8", 100)],
        MediaType::Application => Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpInfo {
    #[serde(default)]
    pub mux: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpType {
    Active,
    Passive,
    So,
}

impl TcpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpType::Active => "active",
            TcpType::Passive => "passive",
            TcpType::So => "so",
        }
    }
}

/// A structured ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    /// 1 for RTP, 2 for RTCP.
    pub component_id: u8,
    /// `UDP` or `TCP`.
    pub transport: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<TcpType>,
}

impl IceCandidate {
    pub fn is_ipv6(&self) -> bool {
        self.address.contains(':')
    }

    pub fn is_rtp(&self) -> bool {
        self.component_id == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ufrag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub gathering_done: bool,
}

/// Fingerprint reported by the bridge for a line's certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsFingerprint {
    pub fingerprint_hash_function: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<DtlsSetup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_hash_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DtlsInfo {
    pub fn with_setup(setup: DtlsSetup) -> Self {
        Self {
            setup: Some(setup),
            ..Self::default()
        }
    }
}

/// SCTP association parameters of an `application` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SctpInfo {
    pub port: u16,
    pub app: String,
    pub streams: u16,
}

impl Default for SctpInfo {
    fn default() -> Self {
        Self {
            port: 5000,
            app: "webrtc-datachannel".to_string(),
            streams: 1024,
        }
    }
}

/// One media line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescription {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MediaMode>,
    #[serde(default)]
    pub payloads: Vec<Payload>,
    #[serde(default)]
    pub rtcp: RtcpInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<IceInfo>,
    #[serde(default)]
    pub dtls: DtlsInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrcs: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_stream_track_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp: Option<SctpInfo>,
    /// Source to send on this line, set on remote descriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceHandle>,
}

impl MediaDescription {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            port: None,
            address: None,
            mode: None,
            payloads: Vec::new(),
            rtcp: RtcpInfo::default(),
            ice: None,
            dtls: DtlsInfo::default(),
            ssrcs: None,
            cname: None,
            media_stream_id: None,
            media_stream_track_id: None,
            sctp: None,
            source: None,
        }
    }

    /// A line for a fresh offer: default payloads, `rtcp-mux` and `actpass`.
    pub fn fresh(media_type: MediaType, mode: MediaMode) -> Self {
        let mut mdesc = Self::new(media_type);
        mdesc.payloads = default_payloads(media_type);
        mdesc.rtcp.mux = true;
        mdesc.dtls = DtlsInfo::with_setup(DtlsSetup::Actpass);
        mdesc.mode = Some(mode);
        if media_type == MediaType::Application {
            mdesc.sctp = Some(SctpInfo::default());
        }
        mdesc
    }

    /// Whether every parameter the engine must supply is present.
    pub fn is_locally_complete(&self) -> bool {
        let transport_ready = self.dtls.fingerprint.is_some() && self.ice.is_some();
        match self.media_type {
            MediaType::Application => transport_ready,
            MediaType::Audio | MediaType::Video => {
                transport_ready && self.ssrcs.is_some() && self.cname.is_some()
            }
        }
    }

    pub fn gathering_done(&self) -> bool {
        self.ice.as_ref().is_some_and(|ice| ice.gathering_done)
    }

    /// Whether the peer will send media on this remote line.
    pub fn expects_source(&self) -> bool {
        self.media_type != MediaType::Application && self.mode != Some(MediaMode::Recvonly)
    }
}

/// A structured session description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub media_descriptions: Vec<MediaDescription>,
}

impl SessionInfo {
    pub fn is_locally_complete(&self) -> bool {
        self.media_descriptions
            .iter()
            .all(MediaDescription::is_locally_complete)
    }

    pub fn all_gathering_done(&self) -> bool {
        self.media_descriptions
            .iter()
            .all(MediaDescription::gathering_done)
    }

    pub fn has_application_line(&self) -> bool {
        self.media_descriptions
            .iter()
            .any(|m| m.media_type == MediaType::Application)
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.media_descriptions
            .iter()
            .any(|m| m.media_stream_track_id.as_deref() == Some(track_id))
    }
}
