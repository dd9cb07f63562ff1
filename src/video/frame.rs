//! Media frame type passed from the framer to the sink

use bytes::Bytes;
use std::time::Duration;

/// One NAL unit ready to be written to a video sink
///
/// `data` holds the unit without its Annex B start code.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl MediaFrame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }
}
