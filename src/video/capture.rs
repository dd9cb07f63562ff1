//! Capture command selection
//!
//! A capture command describes the external process whose stdout carries the
//! raw H.264 Annex B stream for one relay run.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceShell, ProcessSpec};

/// Default screenrecord bit rate (bps)
const DEFAULT_BIT_RATE: u32 = 8_000_000;

fn default_bit_rate() -> u32 {
    DEFAULT_BIT_RATE
}

fn default_pattern_width() -> u32 {
    360
}

fn default_pattern_height() -> u32 {
    640
}

fn default_pattern_fps() -> u32 {
    30
}

fn default_loop_width() -> u32 {
    270
}

fn default_loop_height() -> u32 {
    480
}

fn default_loop_fps() -> u32 {
    20
}

/// Producer of the H.264 byte stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureCommand {
    /// `screenrecord` on the device, streamed through the device shell
    Screenrecord {
        #[serde(default = "default_bit_rate")]
        bit_rate: u32,
    },
    /// Local ffmpeg test source, no device needed
    TestPattern {
        #[serde(default = "default_pattern_width")]
        width: u32,
        #[serde(default = "default_pattern_height")]
        height: u32,
        #[serde(default = "default_pattern_fps")]
        fps: u32,
    },
    /// Local video file re-encoded in a loop
    LoopFile {
        path: String,
        #[serde(default = "default_loop_fps")]
        fps: u32,
        #[serde(default = "default_loop_width")]
        width: u32,
        #[serde(default = "default_loop_height")]
        height: u32,
    },
    /// Arbitrary program writing Annex B H.264 to stdout
    Custom {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for CaptureCommand {
    fn default() -> Self {
        CaptureCommand::Screenrecord {
            bit_rate: DEFAULT_BIT_RATE,
        }
    }
}

impl CaptureCommand {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureCommand::Screenrecord { .. } => "screenrecord",
            CaptureCommand::TestPattern { .. } => "test_pattern",
            CaptureCommand::LoopFile { .. } => "loop_file",
            CaptureCommand::Custom { .. } => "custom",
        }
    }

    /// Resolve into a launchable process
    ///
    /// Only `screenrecord` goes through the device shell; the others run
    /// locally.
    pub fn to_spec(&self, shell: &dyn DeviceShell) -> ProcessSpec {
        match self {
            CaptureCommand::Screenrecord { bit_rate } => shell.stream_spec(&[
                "screenrecord".to_string(),
                "--output-format=h264".to_string(),
                "--bit-rate".to_string(),
                bit_rate.to_string(),
                "-".to_string(),
            ]),
            CaptureCommand::TestPattern { width, height, fps } => ffmpeg(&[
                "-re",
                "-f",
                "lavfi",
                "-i",
                &format!("testsrc=size={}x{}:rate={}", width, height, fps),
                "-pix_fmt",
                "yuv420p",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-f",
                "h264",
                "pipe:1",
            ]),
            CaptureCommand::LoopFile {
                path,
                fps,
                width,
                height,
            } => ffmpeg(&[
                "-re",
                "-stream_loop",
                "-1",
                "-i",
                path.as_str(),
                "-vf",
                &format!("fps={},scale={}:{}", fps, width, height),
                "-c:v",
                "libx264",
                "-preset",
                "superfast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-pix_fmt",
                "yuv420p",
                "-g",
                "60",
                "-an",
                "-bsf:v",
                "h264_mp4toannexb",
                "-f",
                "h264",
                "pipe:1",
            ]),
            CaptureCommand::Custom { program, args } => ProcessSpec::new(program.clone(), args.clone()),
        }
    }
}

fn ffmpeg(args: &[&str]) -> ProcessSpec {
    let mut full = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    full.extend(args.iter().map(|a| a.to_string()));
    ProcessSpec::new("ffmpeg", full)
}
