//! MJPEG multipart framing (writer side).
//!
//! Produces the same body the Pi car server emits on `/video`:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! under `Content-Type: multipart/x-mixed-replace; boundary=frame`.
//! Readers never parse this framing; the extractor skips it as noise.

use std::io::{self, Write};

/// Boundary used by the Pi car server.
pub const DEFAULT_BOUNDARY: &str = "frame";

/// HTTP `Content-Type` for a stream using `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Writes one multipart part per JPEG.
pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
    content_length: bool,
    parts_written: u64,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            boundary: DEFAULT_BOUNDARY.to_string(),
            content_length: false,
            parts_written: 0,
        }
    }

    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Emit a `Content-Length` header on each part.
    pub fn with_content_length(mut self, enabled: bool) -> Self {
        self.content_length = enabled;
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Write one part and flush it.
    pub fn write_part(&mut self, jpeg: &[u8]) -> io::Result<()> {
        write!(self.inner, "--{}\r\nContent-Type: image/jpeg\r\n", self.boundary)?;
        if self.content_length {
            write!(self.inner, "Content-Length: {}\r\n", jpeg.len())?;
        }
        self.inner.write_all(b"\r\n")?;
        self.inner.write_all(jpeg)?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()?;
        self.parts_written += 1;
        Ok(())
    }

    pub fn parts_written(&self) -> u64 {
        self.parts_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Solid dark frame, used when no camera images are available.
#[cfg(feature = "jpeg")]
pub fn placeholder_jpeg(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;
    use image::codecs::jpeg::JpegEncoder;

    let pixels = image::RgbImage::from_pixel(width, height, image::Rgb([16, 16, 16]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80)
        .encode_image(&pixels)
        .context("encode placeholder jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pi_server_part_layout() -> io::Result<()> {
        let mut writer = MultipartWriter::new(Vec::new());
        writer.write_part(b"\xFF\xD8abc\xFF\xD9")?;
        assert_eq!(writer.parts_written(), 1);
        assert_eq!(
            writer.into_inner(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8abc\xFF\xD9\r\n".to_vec()
        );
        Ok(())
    }

    #[test]
    fn optional_content_length_and_boundary() -> io::Result<()> {
        let mut writer = MultipartWriter::new(Vec::new())
            .with_boundary("picar")
            .with_content_length(true);
        writer.write_part(b"xy")?;
        let body = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        assert_eq!(
            body,
            "--picar\r\nContent-Type: image/jpeg\r\nContent-Length: 2\r\n\r\nxy\r\n"
        );
        assert_eq!(
            content_type("picar"),
            "multipart/x-mixed-replace; boundary=picar"
        );
        Ok(())
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn placeholder_is_marker_delimited() -> anyhow::Result<()> {
        let jpeg = placeholder_jpeg(16, 16)?;
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
        assert!(jpeg.ends_with(&[0xFF, 0xD9]));
        Ok(())
    }
}
