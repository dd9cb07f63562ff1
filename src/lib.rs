//! droidlink - remote view and control of Android devices over WebRTC
//!
//! The service answers a browser's WebRTC offer, relays the device's live
//! H.264 screen into the session and turns data channel events into device
//! input commands.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod state;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
