//! Video relay module
//!
//! Turns the raw H.264 output of a capture process into framed, paced
//! samples written to the active session's sink.

pub mod capture;
pub mod frame;
pub mod nal;
pub mod relay;
pub mod sink;

pub use capture::CaptureCommand;
pub use frame::MediaFrame;
pub use nal::{AnnexBSplitter, FramingError, NalFramer};
pub use relay::{FramePacing, MediaRelay, RelayExit, RelayReport};
pub use sink::{TrackSink, VideoSink};
