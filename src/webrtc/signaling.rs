//! WebRTC signaling types and session state tracks

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::debug;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

/// SDP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as exchanged over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Offer/answer progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    Idle,
    Negotiating,
    GatheringCandidates,
    Answered,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingState::Idle => write!(f, "idle"),
            SignalingState::Negotiating => write!(f, "negotiating"),
            SignalingState::GatheringCandidates => write!(f, "gathering_candidates"),
            SignalingState::Answered => write!(f, "answered"),
        }
    }
}

/// ICE connectivity of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Disconnected, failed or closed; the session is torn down
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            ConnectionState::New => 0,
            ConnectionState::Checking => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed => 3,
        }
    }

    /// Whether moving to `next` goes forward
    ///
    /// Any terminal state may be entered from a live one; nothing leaves a
    /// terminal state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Map an ICE connection state; `Completed` counts as connected
    pub fn from_ice(state: RTCIceConnectionState) -> Option<Self> {
        match state {
            RTCIceConnectionState::New => Some(ConnectionState::New),
            RTCIceConnectionState::Checking => Some(ConnectionState::Checking),
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                Some(ConnectionState::Connected)
            }
            RTCIceConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCIceConnectionState::Failed => Some(ConnectionState::Failed),
            RTCIceConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Checking => write!(f, "checking"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Move the signaling track forward; backward or repeated steps are ignored
pub fn advance_signaling(tx: &watch::Sender<SignalingState>, next: SignalingState) -> bool {
    tx.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            debug!("Ignoring signaling transition {} -> {}", current, next);
            false
        }
    })
}

/// Move the connectivity track forward; returns whether the state changed
pub fn advance_connection(tx: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    tx.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            debug!("Ignoring connection transition {} -> {}", current, next);
            false
        }
    })
}
