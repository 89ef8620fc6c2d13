//! Frame decoders.
//!
//! A decoder decides whether an extracted marker-delimited range is a usable
//! image. Failures are frame-local: the session drops the frame and continues.
//!
//! - `JpegDecoder`: full decode via the `image` crate (feature: jpeg)
//! - `HeaderDecoder`: walks the JPEG segment chain up to start-of-scan
//! - `PassthroughDecoder`: accepts every frame

use thiserror::Error;

use crate::frame::{FrameInfo, JPEG_EOI, JPEG_SOI};

/// Why an extracted frame was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not delimited by SOI/EOI markers")]
    MissingMarkers,
    #[error("expected segment marker at offset {offset}")]
    Malformed { offset: usize },
    #[error("segment at offset {offset} runs past end of frame")]
    Truncated { offset: usize },
    #[error("no frame header before start of scan")]
    MissingFrameHeader,
    #[error("image decode failed: {0}")]
    Image(String),
}

/// Turns extracted bytes into a verdict. Implementations must be cheap to share
/// across the reader thread.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<FrameInfo, DecodeError>;
}

/// Full JPEG decode.
#[cfg(feature = "jpeg")]
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegDecoder;

#[cfg(feature = "jpeg")]
impl FrameDecoder for JpegDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<FrameInfo, DecodeError> {
        use image::GenericImageView;

        let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        Ok(FrameInfo {
            dimensions: Some(image.dimensions()),
        })
    }
}

/// Structural JPEG check without decoding pixels.
///
/// Accepts a frame when the segment chain from SOI reaches start-of-scan with a
/// frame header (SOFn) on the way, and the frame ends with EOI.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderDecoder;

impl FrameDecoder for HeaderDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<FrameInfo, DecodeError> {
        if bytes.len() < 4 || !bytes.starts_with(&JPEG_SOI) || !bytes.ends_with(&JPEG_EOI) {
            return Err(DecodeError::MissingMarkers);
        }

        let mut dimensions = None;
        let mut offset = JPEG_SOI.len();
        loop {
            if offset + 1 >= bytes.len() || bytes[offset] != 0xFF {
                return Err(DecodeError::Malformed { offset });
            }
            // Fill bytes: any number of 0xFF may precede a marker code.
            let mut code_at = offset + 1;
            while code_at < bytes.len() && bytes[code_at] == 0xFF {
                code_at += 1;
            }
            let Some(&code) = bytes.get(code_at) else {
                return Err(DecodeError::Truncated { offset });
            };

            match code {
                0xD9 => return Err(DecodeError::MissingFrameHeader),
                0x01 | 0xD0..=0xD7 => {
                    offset = code_at + 1;
                    continue;
                }
                _ => {}
            }

            let Some(length) = read_u16(bytes, code_at + 1) else {
                return Err(DecodeError::Truncated { offset });
            };
            let length = length as usize;
            let segment_end = code_at + 1 + length;
            if length < 2 || segment_end > bytes.len() {
                return Err(DecodeError::Truncated { offset });
            }

            if is_frame_header(code) {
                let height = read_u16(bytes, code_at + 4).ok_or(DecodeError::Truncated { offset })?;
                let width = read_u16(bytes, code_at + 6).ok_or(DecodeError::Truncated { offset })?;
                if code_at + 8 > segment_end {
                    return Err(DecodeError::Truncated { offset });
                }
                dimensions = Some((u32::from(width), u32::from(height)));
            }

            if code == 0xDA {
                return match dimensions {
                    Some(_) => Ok(FrameInfo { dimensions }),
                    None => Err(DecodeError::MissingFrameHeader),
                };
            }
            offset = segment_end;
        }
    }
}

/// Accepts everything. For streams whose consumer does its own decoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<FrameInfo, DecodeError> {
        Ok(FrameInfo::default())
    }
}

// SOF0..SOF15, except DHT (C4), JPG (C8) and DAC (CC).
fn is_frame_header(code: u8) -> bool {
    matches!(code, 0xC0..=0xCF) && !matches!(code, 0xC4 | 0xC8 | 0xCC)
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let hi = *bytes.get(at)?;
    let lo = *bytes.get(at + 1)?;
    Some(u16::from_be_bytes([hi, lo]))
}
