//! Frame markers and extracted frames.
//!
//! - `FrameMarker`: The fixed start/end byte pair that delimits one image.
//! - `ExtractedFrame`: Bytes from a start marker through its paired end marker.
//! - `FrameInfo`: What a decoder learned about a frame (dimensions, if any).

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Start/end byte sequences delimiting one image inside the stream.
///
/// Only the JPEG pair is constructible; the fields are private so both
/// sequences are guaranteed non-empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMarker {
    start: &'static [u8],
    end: &'static [u8],
}

impl FrameMarker {
    /// JPEG SOI (`FF D8`) / EOI (`FF D9`).
    pub const JPEG: FrameMarker = FrameMarker {
        start: &JPEG_SOI,
        end: &JPEG_EOI,
    };

    pub fn start(&self) -> &'static [u8] {
        self.start
    }

    pub fn end(&self) -> &'static [u8] {
        self.end
    }

    /// Bytes a marker can straddle across two appends.
    pub(crate) fn overlap(&self) -> usize {
        self.start.len().max(self.end.len()) - 1
    }
}

impl Default for FrameMarker {
    fn default() -> Self {
        Self::JPEG
    }
}

/// What a decoder reported about a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// (width, height) when the decoder could determine them.
    pub dimensions: Option<(u32, u32)>,
}

/// One complete marker-delimited image, markers included.
///
/// Frames have no identity; they are handed to the consumer and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedFrame {
    data: Vec<u8>,
    info: FrameInfo,
}

impl ExtractedFrame {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            info: FrameInfo::default(),
        }
    }

    pub(crate) fn with_info(mut self, info: FrameInfo) -> Self {
        self.info = info;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.info.dimensions
    }
}

impl AsRef<[u8]> for ExtractedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_marker_bytes() {
        let marker = FrameMarker::default();
        assert_eq!(marker.start(), &[0xFF, 0xD8]);
        assert_eq!(marker.end(), &[0xFF, 0xD9]);
        assert_eq!(marker.overlap(), 1);
    }

    #[test]
    fn frame_carries_decoder_info() {
        let frame = ExtractedFrame::new(vec![0xFF, 0xD8, 0xFF, 0xD9]).with_info(FrameInfo {
            dimensions: Some((640, 480)),
        });
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.dimensions(), Some((640, 480)));
        assert_eq!(frame.into_bytes(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
