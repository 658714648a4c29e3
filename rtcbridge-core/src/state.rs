//! Signaling state machine.

use crate::types::SdpType;
use serde::{Deserialize, Serialize};

/// Offer/answer negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl SignalingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        }
    }
}

/// Local candidate gathering progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Which description a transition applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSide {
    Local,
    Remote,
}

impl DescriptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptionSide::Local => "local",
            DescriptionSide::Remote => "remote",
        }
    }
}

/// Target state for setting a description, or `None` if the combination
/// is not allowed.
pub fn transition(
    state: SignalingState,
    side: DescriptionSide,
    sdp_type: SdpType,
) -> Option<SignalingState> {
    use DescriptionSide::*;
    use SdpType::*;
    use SignalingState::*;

    match (state, side, sdp_type) {
        (Stable, Local, Offer) => Some(HaveLocalOffer),
        (Stable, Remote, Offer) => Some(HaveRemoteOffer),
        (HaveLocalOffer, Local, Offer) => Some(HaveLocalOffer),
        (HaveLocalOffer, Remote, Answer) => Some(Stable),
        (HaveRemoteOffer, Local, Answer) => Some(Stable),
        (HaveRemoteOffer, Remote, Offer) => Some(HaveRemoteOffer),
        _ => None,
    }
}
