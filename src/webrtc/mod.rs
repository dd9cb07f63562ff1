//! WebRTC session module
//!
//! Offer/answer negotiation, the per-session media and control wiring, and
//! the single-tenant session manager.
//!
//! Architecture:
//! ```text
//! capture process (screenrecord / ffmpeg)
//!        |
//!        v
//! NalFramer -> MediaRelay -> TrackSink (TrackLocalStaticSample)
//!                                 |
//!                                 v
//!                     WebRTC PeerConnection
//!                                 |
//! Browser <------- POST /offer ------- SessionManager
//!        |
//!        +------- DataChannel ------> ControlChannel -> `input ...`
//! ```

pub mod config;
pub mod link;
pub mod mdns;
pub mod session;
pub mod signaling;

pub use config::WebRtcConfig;
pub use link::SessionLink;
pub use session::{Session, SessionManager, SessionStatus};
pub use signaling::{ConnectionState, SdpType, SessionDescription, SignalingState};
