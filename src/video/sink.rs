//! Video sinks
//!
//! A sink is the per-session destination of relayed frames. The WebRTC
//! implementation wraps a `TrackLocalStaticSample`, which handles RTP
//! packetization for H.264.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::frame::MediaFrame;
use crate::error::{AppError, Result};

/// H.264 RTP clock rate
const H264_CLOCK_RATE: u32 = 90000;

/// Destination for media frames
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Whether writes can still be delivered
    fn is_available(&self) -> bool;

    /// Write one frame
    async fn write_frame(&self, frame: &MediaFrame) -> Result<()>;

    /// Mark the sink unusable; later writes fail and `is_available` is false
    fn release(&self);
}

/// Sink backed by a WebRTC sample track
pub struct TrackSink {
    track: Arc<TrackLocalStaticSample>,
    released: AtomicBool,
}

impl TrackSink {
    /// Create an H.264 sample track
    pub fn h264(track_id: &str, stream_id: &str) -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_string(),
            rtcp_feedback: vec![],
        };

        Self {
            track: Arc::new(TrackLocalStaticSample::new(
                codec,
                track_id.to_string(),
                stream_id.to_string(),
            )),
            released: AtomicBool::new(false),
        }
    }

    /// Track handle to add to a peer connection
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }
}

#[async_trait]
impl VideoSink for TrackSink {
    fn is_available(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    async fn write_frame(&self, frame: &MediaFrame) -> Result<()> {
        if !self.is_available() {
            return Err(AppError::Internal("video sink released".to_string()));
        }

        let sample = Sample {
            data: frame.data.clone(),
            duration: frame.duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::Internal(format!("sample write failed: {}", e)))
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that keeps every written frame
    #[derive(Default)]
    pub struct CollectingSink {
        pub frames: Mutex<Vec<MediaFrame>>,
        released: AtomicBool,
        /// Release automatically after this many frames
        pub release_after: Option<usize>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn releasing_after(count: usize) -> Self {
            Self {
                release_after: Some(count),
                ..Self::default()
            }
        }

        pub fn frame_count(&self) -> usize {
            self.frames.lock().len()
        }
    }

    #[async_trait]
    impl VideoSink for CollectingSink {
        fn is_available(&self) -> bool {
            !self.released.load(Ordering::Acquire)
        }

        async fn write_frame(&self, frame: &MediaFrame) -> Result<()> {
            if !self.is_available() {
                return Err(AppError::Internal("video sink released".to_string()));
            }
            let mut frames = self.frames.lock();
            frames.push(frame.clone());
            if self.release_after.is_some_and(|n| frames.len() >= n) {
                self.release();
            }
            Ok(())
        }

        fn release(&self) {
            self.released.store(true, Ordering::Release);
        }
    }
}
