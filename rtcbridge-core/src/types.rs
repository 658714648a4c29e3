//! Public signaling API dictionaries.

use crate::session::{MediaType, SourceHandle};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// A session description in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl RtcSessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// A trickled candidate tagged with its media line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcIceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: usize,
}

impl RtcIceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_m_line_index: usize) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
    None,
}

/// Accepts either a single string or an array of strings.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrSeq;

    impl<'de> Visitor<'de> for StringOrSeq {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or an array of strings")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut urls = Vec::new();
            while let Some(url) = seq.next_element::<String>()? {
                urls.push(url);
            }
            Ok(urls)
        }
    }

    deserializer.deserialize_any(StringOrSeq)
}

/// A STUN or TURN server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(default, deserialize_with = "string_or_seq")]
    pub urls: Vec<String>,
    /// Legacy single-URL form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Self::default()
        }
    }

    /// `urls` followed by the legacy `url`.
    pub fn all_urls(&self) -> impl Iterator<Item = &str> {
        self.urls
            .iter()
            .map(String::as_str)
            .chain(self.url.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub ice_transports: IceTransportPolicy,
}

/// Accepts a count or a boolean (`true` counts as one).
fn count_or_flag<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CountOrFlag {
        Flag(bool),
        Count(f64),
    }

    Ok(match CountOrFlag::deserialize(deserializer)? {
        CountOrFlag::Flag(flag) => u32::from(flag),
        CountOrFlag::Count(n) if n.is_finite() && n > 0.0 => n as u32,
        CountOrFlag::Count(_) => 0,
    })
}

/// Extra receive-only lines requested in an offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcOfferOptions {
    #[serde(default, deserialize_with = "count_or_flag")]
    pub offer_to_receive_audio: u32,
    #[serde(default, deserialize_with = "count_or_flag")]
    pub offer_to_receive_video: u32,
}

/// One of the `audio` / `video` members of a media request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaConstraint {
    Enabled(bool),
    Options(serde_json::Map<String, serde_json::Value>),
}

impl Default for MediaConstraint {
    fn default() -> Self {
        MediaConstraint::Enabled(false)
    }
}

impl MediaConstraint {
    pub fn is_requested(&self) -> bool {
        match self {
            MediaConstraint::Enabled(enabled) => *enabled,
            MediaConstraint::Options(_) => true,
        }
    }

    /// String member of the options form, such as `facingMode`.
    pub fn option(&self, name: &str) -> Option<&str> {
        match self {
            MediaConstraint::Enabled(_) => None,
            MediaConstraint::Options(options) => options.get(name)?.as_str(),
        }
    }
}

/// Request for capture sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaStreamConstraints {
    #[serde(default)]
    pub audio: MediaConstraint,
    #[serde(default)]
    pub video: MediaConstraint,
}

impl MediaStreamConstraints {
    pub fn has_media(&self) -> bool {
        self.audio.is_requested() || self.video.is_requested()
    }
}

/// A capture source granted by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub media_type: MediaType,
    pub label: String,
    pub source: SourceHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ice_server_url_forms() {
        let config: RtcConfiguration = serde_json::from_value(json!({
            "iceServers": [
                {"urls": "stun:stun.example.org"},
                {"urls": ["turn:a.example.org", "turn:b.example.org:5349?transport=tcp"],
                 "username": "u", "credential": "c"},
                {"url": "stun:legacy.example.org:19302"}
            ]
        }))
        .unwrap();

        assert_eq!(config.ice_transports, IceTransportPolicy::All);
        let urls: Vec<&str> = config.ice_servers.iter().flat_map(IceServer::all_urls).collect();
        assert_eq!(
            urls,
            vec![
                "stun:stun.example.org",
                "turn:a.example.org",
                "turn:b.example.org:5349?transport=tcp",
                "stun:legacy.example.org:19302"
            ]
        );
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_ice_server_rejects_numbers() {
        let result: Result<IceServer, _> = serde_json::from_value(json!({"urls": 5}));
        assert!(result.is_err());
    }

    #[test]
    fn test_offer_options_accept_numbers_and_flags() {
        let options: RtcOfferOptions =
            serde_json::from_value(json!({"offerToReceiveAudio": true, "offerToReceiveVideo": 2}))
                .unwrap();
        assert_eq!(options.offer_to_receive_audio, 1);
        assert_eq!(options.offer_to_receive_video, 2);

        let options: RtcOfferOptions =
            serde_json::from_value(json!({"offerToReceiveAudio": false, "offerToReceiveVideo": -1}))
                .unwrap();
        assert_eq!(options, RtcOfferOptions::default());
    }

    #[test]
    fn test_description_wire_form() {
        let desc = RtcSessionDescription::new(SdpType::Answer, "v=0");
        assert_eq!(
            serde_json::to_value(&desc).unwrap(),
            json!({"type": "answer", "sdp": "v=0"})
        );

        let candidate: RtcIceCandidate =
            serde_json::from_value(json!({"candidate": "candidate:1", "sdpMLineIndex": 1})).unwrap();
        assert_eq!(candidate.sdp_m_line_index, 1);
        assert_eq!(candidate.sdp_mid, None);
    }

    #[test]
    fn test_media_constraints_forms() {
        let constraints: MediaStreamConstraints =
            serde_json::from_value(json!({"audio": true, "video": {"facingMode": "environment"}}))
                .unwrap();
        assert!(constraints.audio.is_requested());
        assert!(constraints.video.is_requested());
        assert_eq!(constraints.video.option("facingMode"), Some("environment"));
        assert_eq!(constraints.audio.option("facingMode"), None);

        let none: MediaStreamConstraints = serde_json::from_value(json!({"video": false})).unwrap();
        assert!(!none.has_media());
    }
}
