use serde::{Deserialize, Serialize};

// Re-export section types owned by their modules
pub use crate::control::DispatchPolicy;
pub use crate::video::capture::CaptureCommand;
pub use crate::video::relay::FramePacing;
pub use crate::webrtc::config::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Device shell settings
    pub device: DeviceConfig,
    /// Video relay settings
    pub stream: StreamConfig,
    /// WebRTC transport settings
    pub webrtc: WebRtcConfig,
    /// Control channel settings
    pub control: ControlConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Directory holding the browser client, served at `/`
    pub static_dir: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            static_dir: None,
        }
    }
}

/// Device shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Path to the adb binary
    pub adb_path: String,
    /// Device serial (`adb -s`), e.g. "localhost:5555"
    pub serial: Option<String>,
    /// Width the browser client maps its coordinates to
    pub reference_width: u32,
    /// Height the browser client maps its coordinates to
    pub reference_height: u32,
    /// Timeout for a single shell command (ms)
    pub command_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
            reference_width: 1080,
            reference_height: 1920,
            command_timeout_ms: 10_000,
        }
    }
}

/// Video relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// External producer of the H.264 byte stream
    pub capture: CaptureCommand,
    /// Sample duration policy
    pub pacing: FramePacing,
    /// Nominal frame rate, used for the first sample in realtime pacing
    pub fps: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capture: CaptureCommand::default(),
            pacing: FramePacing::Asap,
            fps: 30,
        }
    }
}

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How decoded commands are scheduled
    pub dispatch: DispatchPolicy,
    /// Swipe duration used when the client omits one (ms)
    pub default_swipe_ms: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::Ordered,
            default_swipe_ms: 300,
        }
    }
}
