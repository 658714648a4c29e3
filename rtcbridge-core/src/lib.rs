//! # rtcbridge-core
//!
//! Signaling engine for rtcbridge.
//!
//! This crate provides:
//! - The session model exchanged with the bridge (media lines, ICE, DTLS)
//! - ICE candidate attribute parsing and formatting
//! - The offer/answer signaling state machine
//! - A FIFO operation queue serializing signaling calls
//! - `PeerConnection`, the public signaling API

pub mod candidate;
pub mod error;
pub mod handler;
pub mod media;
pub mod peer;
pub mod queue;
pub mod session;
pub mod state;
pub mod types;

pub use candidate::{format_candidate, parse_candidate};
pub use error::SignalingError;
pub use handler::{JsonSdpCodec, PeerHandler, PeerHandlerClient, SdpCodec};
pub use media::{MediaStream, MediaStreamTrack, RtcDataChannel};
pub use peer::{PeerConnection, PeerConnectionEvent, SignalingConfig};
pub use queue::OperationQueue;
pub use session::{
    default_payloads, CandidateType, DtlsFingerprint, DtlsInfo, DtlsSetup, IceCandidate, IceInfo,
    MediaDescription, MediaMode, MediaType, Payload, RtcpInfo, SctpInfo, SessionInfo, SourceHandle,
    TcpType,
};
pub use state::{transition, DescriptionSide, IceGatheringState, SignalingState};
pub use types::{
    IceServer, IceTransportPolicy, MediaConstraint, MediaStreamConstraints, RtcConfiguration,
    RtcIceCandidate, RtcOfferOptions, RtcSessionDescription, SdpType, SourceInfo,
};
