//! FrameDemuxer - JPEG frame extraction from an MJPEG byte stream
//!
//! ## Responsibilities
//!
//! - Accumulate raw stream bytes across reads
//! - Cut complete `FFD8 .. FFD9` ranges out of the buffer
//! - Keep partial trailing bytes for the next read
//!
//! Frame extraction relies solely on SOI/EOI markers; multipart boundaries and
//! part headers are treated as junk between frames. Image validity is the
//! caller's concern.

/// JPEG Start-Of-Image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG End-Of-Image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Incremental JPEG frame demultiplexer.
///
/// One instance belongs to one stream reader; it is not meant to be shared
/// between concurrent feeders.
#[derive(Debug, Default)]
pub struct FrameDemuxer {
    buffer: Vec<u8>,
    /// Buffer starts with a start marker whose end marker is still pending
    in_frame: bool,
    /// Offset where the next marker search resumes
    scan_from: usize,
    frames_emitted: u64,
}

impl FrameDemuxer {
    /// Create an empty demuxer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return the frames that are now complete.
    ///
    /// The returned iterator extracts lazily. Frames not pulled before it is
    /// dropped stay buffered and come out of the next `feed` call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { demuxer: self }
    }

    /// Convenience wrapper collecting everything `feed` yields
    pub fn feed_all(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.feed(chunk).collect()
    }

    /// End of stream. Drops whatever is left (at most a truncated frame) and
    /// returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            tracing::debug!(
                discarded_bytes = discarded,
                truncated_frame = find_marker(&self.buffer, &JPEG_SOI).is_some(),
                "Discarding trailing stream bytes"
            );
        }
        self.buffer.clear();
        self.in_frame = false;
        self.scan_from = 0;
        discarded
    }

    /// Bytes currently held back waiting for more input
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total frames emitted since creation
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        if !self.in_frame {
            let Some(start) = find_marker_from(&self.buffer, &JPEG_SOI, self.scan_from) else {
                // the last byte may be the first half of a marker
                self.scan_from = self.buffer.len().saturating_sub(1);
                return None;
            };
            self.buffer.drain(..start);
            self.in_frame = true;
            self.scan_from = JPEG_SOI.len();
        }

        let Some(end) = find_marker_from(&self.buffer, &JPEG_EOI, self.scan_from) else {
            self.scan_from = self.buffer.len().saturating_sub(1).max(JPEG_SOI.len());
            return None;
        };

        let frame: Vec<u8> = self.buffer.drain(..end + JPEG_EOI.len()).collect();
        self.in_frame = false;
        self.scan_from = 0;
        self.frames_emitted += 1;
        Some(frame)
    }
}

/// Lazy sequence of complete frames produced by one `feed` call
pub struct Frames<'a> {
    demuxer: &'a mut FrameDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.demuxer.next_frame()
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    find_marker_from(buffer, marker, 0)
}

fn find_marker_from(buffer: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
