//! WebRTC configuration

use serde::{Deserialize, Serialize};

/// Public STUN servers used when none are configured
pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// Maximum wait for ICE candidate gathering before answering (ms)
    pub gathering_timeout_ms: u64,
    /// mDNS candidate mode (disabled, query_only, query_and_gather)
    pub mdns_mode: Option<String>,
    /// Video track ID
    pub track_id: String,
    /// Video stream ID
    pub stream_id: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            gathering_timeout_ms: 10_000,
            mdns_mode: None,
            track_id: "video".to_string(),
            stream_id: "android-screen".to_string(),
        }
    }
}
