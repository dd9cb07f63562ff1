//! H.264 Annex B framing
//!
//! Splits an arbitrary byte stream into NAL units delimited by
//! `00 00 01` / `00 00 00 01` start codes. The framer buffers across reads,
//! so the output does not depend on how the producer's writes were chunked.
//! Units are emitted without start codes, which is what
//! `TrackLocalStaticSample` expects.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Largest NAL unit accepted before the stream is considered corrupt
pub const DEFAULT_MAX_NAL_SIZE: usize = 8 * 1024 * 1024;

/// Read size for the underlying stream
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Unrecoverable framing condition
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("NAL unit exceeds {limit} bytes without a start code")]
    Oversized { limit: usize },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Position of the first `00 00 01` at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 2 < data.len() {
        // A byte above 1 at i+2 rules out a start code at i, i+1 and i+2
        if data[i + 2] > 1 {
            i += 3;
            continue;
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Drop zero bytes that belong to a following 4-byte start code or padding
fn trim_trailing_zeros(mut unit: Bytes) -> Bytes {
    let end = unit.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    unit.truncate(end);
    unit
}

/// Incremental Annex B splitter
///
/// Feed bytes with [`push`](Self::push), pull complete units with
/// [`next_unit`](Self::next_unit) and flush the last unit with
/// [`finish`](Self::finish) at end of stream.
#[derive(Debug)]
pub struct AnnexBSplitter {
    buf: BytesMut,
    /// A start code has been seen; `buf` begins with unit payload
    in_unit: bool,
    /// Resume offset for the start code search within the current unit
    search_from: usize,
    max_unit_size: usize,
}

impl AnnexBSplitter {
    pub fn new(max_unit_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            in_unit: false,
            search_from: 0,
            max_unit_size,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete unit, if the buffer holds one
    pub fn next_unit(&mut self) -> Result<Option<Bytes>, FramingError> {
        loop {
            if !self.in_unit {
                match find_start_code(&self.buf, 0) {
                    Some(pos) => {
                        if pos > 0 {
                            debug!("Discarding {} bytes before first start code", pos);
                        }
                        self.buf.advance(pos + 3);
                        self.in_unit = true;
                        self.search_from = 0;
                    }
                    None => {
                        // Keep a possible partial start code
                        let drop = self.buf.len().saturating_sub(2);
                        self.buf.advance(drop);
                        return Ok(None);
                    }
                }
            }

            match find_start_code(&self.buf, self.search_from) {
                Some(pos) => {
                    let unit = self.buf.split_to(pos).freeze();
                    self.buf.advance(3);
                    self.search_from = 0;

                    let unit = trim_trailing_zeros(unit);
                    if unit.is_empty() {
                        continue;
                    }
                    return Ok(Some(unit));
                }
                None => {
                    if self.buf.len() > self.max_unit_size {
                        return Err(FramingError::Oversized {
                            limit: self.max_unit_size,
                        });
                    }
                    self.search_from = self.buf.len().saturating_sub(2);
                    return Ok(None);
                }
            }
        }
    }

    /// Flush the unit still buffered at end of stream
    pub fn finish(&mut self) -> Option<Bytes> {
        if !self.in_unit {
            self.buf.clear();
            return None;
        }
        self.in_unit = false;
        self.search_from = 0;
        let unit = trim_trailing_zeros(self.buf.split().freeze());
        (!unit.is_empty()).then_some(unit)
    }
}

impl Default for AnnexBSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NAL_SIZE)
    }
}

/// Lazy NAL unit sequence over an async byte stream
///
/// One framer per capture process run; it is not restartable.
pub struct NalFramer<R> {
    reader: R,
    splitter: AnnexBSplitter,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> NalFramer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_unit_size(reader, DEFAULT_MAX_NAL_SIZE)
    }

    pub fn with_max_unit_size(reader: R, max_unit_size: usize) -> Self {
        Self {
            reader,
            splitter: AnnexBSplitter::new(max_unit_size),
            scratch: vec![0u8; READ_CHUNK_SIZE],
            eof: false,
        }
    }

    /// Next complete NAL unit; `Ok(None)` once the source is exhausted
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError> {
        loop {
            if let Some(unit) = self.splitter.next_unit()? {
                return Ok(Some(unit));
            }
            if self.eof {
                return Ok(self.splitter.finish());
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.splitter.push(&self.scratch[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    /// SPS, PPS, IDR and P slice with mixed start code lengths
    fn sample_stream() -> Vec<u8> {
        vec![
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1f, // SPS
            0x00, 0x00, 0x01, 0x68, 0xce, 0x38, 0x80, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x21, // IDR (contains a zero)
            0x00, 0x00, 0x01, 0x41, 0x9a, 0x02, // P slice
        ]
    }

    fn expected_units() -> Vec<Vec<u8>> {
        vec![
            vec![0x67, 0x42, 0x00, 0x1f],
            vec![0x68, 0xce, 0x38, 0x80],
            vec![0x65, 0x88, 0x84, 0x00, 0x21],
            vec![0x41, 0x9a, 0x02],
        ]
    }

    /// Units up to end of stream or the first framing error
    async fn drain<R: AsyncRead + Unpin>(mut framer: NalFramer<R>) -> Vec<Bytes> {
        let mut units = Vec::new();
        while let Ok(Some(unit)) = framer.next_frame().await {
            units.push(unit);
        }
        units
    }

    async fn collect_chunked(data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let mut builder = Builder::new();
        for part in data.chunks(chunk) {
            builder.read(part);
        }
        drain(NalFramer::new(builder.build()))
            .await
            .into_iter()
            .map(|b| b.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_single_chunk() {
        let data = sample_stream();
        assert_eq!(collect_chunked(&data, data.len()).await, expected_units());
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_units() {
        let data = sample_stream();
        let whole = collect_chunked(&data, data.len()).await;
        for chunk in 1..=data.len() {
            assert_eq!(collect_chunked(&data, chunk).await, whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_splitter_byte_at_a_time() {
        let mut splitter = AnnexBSplitter::default();
        let mut units = Vec::new();
        for b in sample_stream() {
            splitter.push(&[b]);
            while let Some(unit) = splitter.next_unit().unwrap() {
                units.push(unit.to_vec());
            }
        }
        // The last unit has no terminating start code until end of stream
        assert_eq!(units.len(), 3);
        units.extend(splitter.finish().map(|u| u.to_vec()));
        assert_eq!(units, expected_units());
    }

    #[tokio::test]
    async fn test_leading_garbage_discarded() {
        let mut data = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
        data.extend(sample_stream());
        assert_eq!(collect_chunked(&data, 3).await, expected_units());
    }

    #[tokio::test]
    async fn test_no_start_code_yields_nothing() {
        let data = vec![0x11; 4096];
        assert!(collect_chunked(&data, 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_units_skipped() {
        let data = vec![
            0x00, 0x00, 0x01, 0x00, 0x00, 0x01, // empty unit
            0x09, 0xf0, // AUD
            0x00, 0x00, 0x00, 0x00, 0x01, 0x67, // extra zero padding before start code
        ];
        assert_eq!(
            collect_chunked(&data, 2).await,
            vec![vec![0x09, 0xf0], vec![0x67]]
        );
    }

    #[tokio::test]
    async fn test_oversized_unit_terminates() {
        let mut data = vec![0x00, 0x00, 0x01, 0x67, 0x42];
        data.extend(vec![0x00, 0x00, 0x01]);
        data.extend(vec![0x55; 256]);
        let reader = Builder::new().read(&data).build();

        let mut framer = NalFramer::with_max_unit_size(reader, 64);
        assert_eq!(framer.next_frame().await.unwrap().unwrap().as_ref(), &[0x67, 0x42]);
        assert!(matches!(
            framer.next_frame().await,
            Err(FramingError::Oversized { limit: 64 })
        ));
    }

    #[tokio::test]
    async fn test_read_error_terminates() {
        let reader = Builder::new()
            .read(&[0x00, 0x00, 0x01, 0x67, 0x00, 0x00, 0x01, 0x68])
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let mut framer = NalFramer::new(reader);
        assert_eq!(framer.next_frame().await.unwrap().unwrap().as_ref(), &[0x67]);
        assert!(matches!(framer.next_frame().await, Err(FramingError::Io(_))));
    }
}
