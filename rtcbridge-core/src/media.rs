//! Media streams, tracks and data channels.

use crate::session::{MediaType, SourceHandle};
use serde::{Deserialize, Serialize};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single audio or video track backed by a bridge source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStreamTrack {
    pub id: String,
    pub kind: MediaType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceHandle>,
}

impl MediaStreamTrack {
    pub fn new(kind: MediaType, label: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            kind,
            label: label.into(),
            source: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source(mut self, source: SourceHandle) -> Self {
        self.source = Some(source);
        self
    }
}

/// An ordered group of tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaStreamTrack>,
}

impl MediaStream {
    /// Creates a stream with a random id.
    pub fn new(tracks: Vec<MediaStreamTrack>) -> Self {
        Self::with_id(new_id(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaStreamTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaType::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaType::Video)
    }

    pub fn track_by_id(&self, id: &str) -> Option<&MediaStreamTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

/// A data channel awaiting or using an `application` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcDataChannel {
    pub id: u16,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_track_lookup() {
        let mic = MediaStreamTrack::new(MediaType::Audio, "mic").with_id("a1");
        let cam = MediaStreamTrack::new(MediaType::Video, "cam").with_id("v1");
        let stream = MediaStream::with_id("s1", vec![mic, cam]);

        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().next().unwrap().label, "cam");
        assert_eq!(stream.track_by_id("a1").unwrap().kind, MediaType::Audio);
        assert!(stream.track_by_id("nope").is_none());
        assert_ne!(MediaStream::new(vec![]).id, MediaStream::new(vec![]).id);
    }
}
