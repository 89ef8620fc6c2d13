//! Frame boundary extraction.
//!
//! `FrameExtractor` consumes an unstructured byte stream in arbitrary chunks and
//! yields every complete start-marker..end-marker range it finds, in stream order.
//!
//! The extractor is responsible for:
//! - Anchoring the receive buffer at a start marker (leading bytes are noise,
//!   e.g. multipart boundary lines and part headers)
//! - Pairing the first start marker with the first end marker after it
//! - Clearing marker-free noise once it exceeds `max_buffer_bytes`
//!
//! The extractor MUST NOT:
//! - Decode frames (see `decode`)
//! - Depend on how the stream was chunked
//! - Perform I/O

use crate::frame::{ExtractedFrame, FrameMarker};

/// Default receive buffer cap.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1_000_000;

/// Counters for one extractor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub frames_extracted: u64,
    /// Noise between frames plus everything dropped on overflow.
    pub bytes_discarded: u64,
    pub overflows: u64,
    /// Overflows since the last extracted frame.
    pub consecutive_overflows: u32,
}

/// Marker-scanning state machine over an append-only receive buffer.
///
/// Between calls the buffer is always in one of three states:
/// - empty
/// - anchored: begins with a start marker, no end marker after it
/// - unanchored: contains no start marker at all
///
/// Scanning resumes where the previous call stopped, so a stream delivered in
/// many small chunks costs the same as one delivered whole.
#[derive(Debug)]
pub struct FrameExtractor {
    marker: FrameMarker,
    max_buffer_bytes: usize,
    buffer: Vec<u8>,
    stats: ExtractorStats,
}

impl FrameExtractor {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            marker: FrameMarker::JPEG,
            max_buffer_bytes,
            buffer: Vec::with_capacity(64 * 1024),
            stats: ExtractorStats::default(),
        }
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    /// Bytes received but not yet consumed into a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &ExtractorStats {
        &self.stats
    }

    /// Drop all pending bytes and counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stats = ExtractorStats::default();
    }

    /// Drop pending bytes, keeping counters.
    pub fn discard_pending(&mut self) {
        self.buffer.clear();
    }

    /// Append `chunk` and return every frame it completed, oldest first.
    ///
    /// An empty chunk is a no-op.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<ExtractedFrame> {
        let mut frames = Vec::new();
        if chunk.is_empty() {
            return frames;
        }

        let start_len = self.marker.start().len();
        let was_anchored = self.is_anchored();
        let resume = self.buffer.len().saturating_sub(self.marker.overlap());
        self.buffer.extend_from_slice(chunk);

        let mut end_from = if was_anchored {
            resume.max(start_len)
        } else {
            match find(&self.buffer, self.marker.start(), resume) {
                Some(offset) => {
                    self.discard_front(offset);
                    start_len
                }
                None => {
                    if self.buffer.len() > self.max_buffer_bytes {
                        self.overflow();
                    }
                    return frames;
                }
            }
        };

        while let Some(end) = find(&self.buffer, self.marker.end(), end_from) {
            let frame_end = end + self.marker.end().len();
            let data: Vec<u8> = self.buffer.drain(..frame_end).collect();
            self.stats.frames_extracted += 1;
            self.stats.consecutive_overflows = 0;
            frames.push(ExtractedFrame::new(data));

            match find(&self.buffer, self.marker.start(), 0) {
                Some(offset) => {
                    self.discard_front(offset);
                    end_from = start_len;
                }
                None => break,
            }
        }

        // Remainder is either a partial frame (kept whatever its size) or
        // marker-free noise.
        if !self.is_anchored() && self.buffer.len() > self.max_buffer_bytes {
            self.overflow();
        }
        frames
    }

    fn is_anchored(&self) -> bool {
        self.buffer.starts_with(self.marker.start())
    }

    fn discard_front(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.buffer.drain(..len);
        self.stats.bytes_discarded += len as u64;
    }

    fn overflow(&mut self) {
        let keep = self.partial_start_suffix();
        let dropped = self.buffer.len() - keep;
        self.discard_front(dropped);
        self.stats.overflows += 1;
        self.stats.consecutive_overflows = self.stats.consecutive_overflows.saturating_add(1);
        log::debug!(
            "receive buffer exceeded {} bytes without a complete frame; dropped {} bytes",
            self.max_buffer_bytes,
            dropped
        );
    }

    /// Length of a trailing prefix of the start marker (a marker split across chunks).
    fn partial_start_suffix(&self) -> usize {
        let start = self.marker.start();
        (1..start.len())
            .rev()
            .find(|&len| len <= self.max_buffer_bytes && self.buffer.ends_with(&start[..len]))
            .unwrap_or(0)
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES)
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn bytes_of(frames: &[ExtractedFrame]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.bytes().to_vec()).collect()
    }

    #[test]
    fn minimal_frame_in_one_chunk() {
        let mut extractor = FrameExtractor::default();
        let frames = extractor.push_chunk(&jpeg(b"AAAA"));
        assert_eq!(bytes_of(&frames), vec![jpeg(b"AAAA")]);
        assert_eq!(extractor.buffered_len(), 0);
    }

    #[test]
    fn noise_around_frames_is_discarded_across_chunks() {
        let mut stream = b"garbage".to_vec();
        stream.extend(jpeg(b"frame1"));
        stream.extend_from_slice(b"noise");
        stream.extend(jpeg(b"frame2"));

        let mut extractor = FrameExtractor::default();
        let mut frames = Vec::new();
        for chunk in [&stream[..5], &stream[5..20], &stream[20..]] {
            frames.extend(extractor.push_chunk(chunk));
        }

        assert_eq!(bytes_of(&frames), vec![jpeg(b"frame1"), jpeg(b"frame2")]);
        assert_eq!(extractor.stats().bytes_discarded, 12);
    }

    #[test]
    fn empty_chunk_is_noop() {
        let mut extractor = FrameExtractor::default();
        extractor.push_chunk(&[0xFF, 0xD8, b'x']);
        assert!(extractor.push_chunk(&[]).is_empty());
        assert_eq!(extractor.buffered_len(), 3);
        assert_eq!(extractor.stats(), &ExtractorStats::default());
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let mut extractor = FrameExtractor::default();
        assert!(extractor.push_chunk(&[0xFF, 0xD8, b'a', b'b', b'c']).is_empty());
        assert_eq!(extractor.buffered_len(), 5);
        let frames = extractor.push_chunk(&[b'd', 0xFF, 0xD9, b'\r', b'\n']);
        assert_eq!(bytes_of(&frames), vec![jpeg(b"abcd")]);
        assert_eq!(extractor.buffered_len(), 2);
    }

    #[test]
    fn markers_split_across_chunks() {
        let mut extractor = FrameExtractor::default();
        assert!(extractor.push_chunk(b"--frame\r\n\xFF").is_empty());
        assert!(extractor.push_chunk(b"\xD8body\xFF").is_empty());
        let frames = extractor.push_chunk(b"\xD9");
        assert_eq!(bytes_of(&frames), vec![jpeg(b"body")]);
    }

    #[test]
    fn first_start_pairs_with_first_end() {
        let mut stream = vec![0xFF, 0xD8, b'a', 0xFF, 0xD8, b'b', 0xFF, 0xD9];
        stream.extend(jpeg(b"c"));
        let mut extractor = FrameExtractor::default();
        let frames = extractor.push_chunk(&stream);
        assert_eq!(
            bytes_of(&frames),
            vec![
                vec![0xFF, 0xD8, b'a', 0xFF, 0xD8, b'b', 0xFF, 0xD9],
                jpeg(b"c")
            ]
        );
    }

    #[test]
    fn end_marker_is_not_matched_inside_start_marker() {
        // FF D8 D9 must not read as SOI immediately followed by EOI.
        let mut extractor = FrameExtractor::default();
        assert!(extractor.push_chunk(&[0xFF, 0xD8, 0xD9]).is_empty());
        let frames = extractor.push_chunk(&[0xFF, 0xD9]);
        assert_eq!(bytes_of(&frames), vec![vec![0xFF, 0xD8, 0xD9, 0xFF, 0xD9]]);
    }

    #[test]
    fn unbounded_noise_never_exceeds_cap() {
        let max = DEFAULT_MAX_BUFFER_BYTES;
        let chunk: Vec<u8> = [0xFFu8, 0x00, b'x', b'y'].repeat(250);
        let mut extractor = FrameExtractor::new(max);
        for _ in 0..2_000 {
            assert!(extractor.push_chunk(&chunk).is_empty());
            assert!(extractor.buffered_len() <= max);
        }
        assert_eq!(extractor.stats().frames_extracted, 0);
        assert_eq!(extractor.stats().overflows, 1);
        assert_eq!(extractor.buffered_len(), 999_000);
    }

    #[test]
    fn frame_larger_than_cap_survives_any_chunking() {
        let mut payload = vec![b'a'; 30];
        payload.extend_from_slice(b"\xFF\x00tail");
        let frame = jpeg(&payload);

        let mut whole = FrameExtractor::new(16);
        assert_eq!(bytes_of(&whole.push_chunk(&frame)), vec![frame.clone()]);

        let mut bytewise = FrameExtractor::new(16);
        let mut frames = Vec::new();
        for byte in &frame {
            frames.extend(bytewise.push_chunk(std::slice::from_ref(byte)));
        }
        assert_eq!(bytes_of(&frames), vec![frame]);
        assert_eq!(bytewise.stats().overflows, 0);
        assert_eq!(bytewise.buffered_len(), 0);
    }

    #[test]
    fn anchored_partial_frame_is_kept_past_cap() {
        let mut extractor = FrameExtractor::new(16);
        let mut partial = vec![0xFF, 0xD8];
        partial.extend_from_slice(&[b'a'; 20]);
        assert!(extractor.push_chunk(&partial).is_empty());
        assert_eq!(extractor.buffered_len(), partial.len());
        assert_eq!(extractor.stats().overflows, 0);

        let frames = extractor.push_chunk(b"b\xFF\xD9");
        let mut expected = partial.clone();
        expected.extend_from_slice(b"b\xFF\xD9");
        assert_eq!(bytes_of(&frames), vec![expected]);
    }

    #[test]
    fn overflow_keeps_split_start_marker() {
        let mut extractor = FrameExtractor::new(8);
        let mut noise = b"xxxxxxxxxx".to_vec();
        noise.push(0xFF);
        assert!(extractor.push_chunk(&noise).is_empty());
        assert_eq!(extractor.buffered_len(), 1);

        let frames = extractor.push_chunk(&[0xD8, b'z', 0xFF, 0xD9]);
        assert_eq!(bytes_of(&frames), vec![jpeg(b"z")]);
    }

    #[test]
    fn reset_clears_pending_bytes() {
        let mut extractor = FrameExtractor::default();
        extractor.push_chunk(b"\xFF\xD8partial");
        extractor.reset();
        assert_eq!(extractor.buffered_len(), 0);
        assert!(extractor.push_chunk(b"tail\xFF\xD9").is_empty());
    }
}
