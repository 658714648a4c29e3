//! Collaborator seams of the signaling engine.

use crate::error::SignalingError;
use crate::session::{DtlsFingerprint, IceCandidate, SessionInfo, SourceHandle};

/// Converts between SDP text and structured sessions.
pub trait SdpCodec: Send + Sync {
    fn parse(&self, sdp: &str) -> Result<SessionInfo, SignalingError>;
    fn generate(&self, session: &SessionInfo) -> String;
}

/// Carries the structured session as JSON text.
///
/// For peers that both run this engine, where no SDP text is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSdpCodec;

impl SdpCodec for JsonSdpCodec {
    fn parse(&self, sdp: &str) -> Result<SessionInfo, SignalingError> {
        serde_json::from_str(sdp)
            .map_err(|e| SignalingError::Syntax(format!("invalid session description: {}", e)))
    }

    fn generate(&self, session: &SessionInfo) -> String {
        serde_json::to_string(session).unwrap_or_default()
    }
}

/// Bridge-side peer handler driving the native engine.
///
/// Calls are fire-and-forget: results come back through
/// [`PeerHandlerClient`].
pub trait PeerHandler: Send + Sync {
    /// Sets up receiving for lines not seen before.
    fn prepare_to_receive(
        &self,
        local: &SessionInfo,
        is_initiator: bool,
    ) -> Result<(), SignalingError>;

    /// Applies remote payloads, candidates and send sources.
    fn prepare_to_send(&self, remote: &SessionInfo, is_initiator: bool)
        -> Result<(), SignalingError>;

    fn add_remote_candidate(
        &self,
        candidate: &IceCandidate,
        mline: usize,
        ufrag: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), SignalingError>;

    fn stop(&self) -> Result<(), SignalingError>;
}

/// Native engine events reported back for one peer connection.
///
/// `mline` is the index of the local media line.
pub trait PeerHandlerClient: Send + Sync {
    fn got_send_ssrc(&self, mline: usize, ssrc: u32, cname: &str) -> Result<(), SignalingError>;

    fn got_dtls_fingerprint(
        &self,
        mline: usize,
        fingerprint: DtlsFingerprint,
    ) -> Result<(), SignalingError>;

    fn got_ice_candidate(
        &self,
        mline: usize,
        candidate: IceCandidate,
        ufrag: &str,
        password: &str,
    ) -> Result<(), SignalingError>;

    fn candidate_gathering_done(&self, mline: usize) -> Result<(), SignalingError>;

    fn got_remote_source(&self, mline: usize, source: SourceHandle)
        -> Result<(), SignalingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MediaDescription, MediaMode, MediaType};

    #[test]
    fn test_json_codec_roundtrip() {
        let session = SessionInfo {
            media_descriptions: vec![MediaDescription::fresh(MediaType::Audio, MediaMode::Sendrecv)],
        };
        let text = JsonSdpCodec.generate(&session);
        assert_eq!(JsonSdpCodec.parse(&text).unwrap(), session);
        assert_eq!(JsonSdpCodec.parse("v=0").unwrap_err().name(), "SyntaxError");
    }
}
