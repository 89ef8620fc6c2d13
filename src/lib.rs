//! Pi car camera stream client.
//!
//! This crate turns the Pi car's MJPEG video feed (an HTTP body of
//! `multipart/x-mixed-replace` parts, or raw concatenated JPEGs) into a
//! sequence of complete, decodable frames.
//!
//! # Architecture
//!
//! The stream is handled in three layers:
//!
//! 1. **Extraction** (`extract`): a pure buffer-scanning state machine that finds
//!    SOI/EOI marker pairs in an append-only buffer, clearing marker-free noise
//!    once it passes a size cap.
//! 2. **Session** (`session`): one logical connection attempt. Decodes extracted
//!    frames, fires the one-shot first-frame signal and ends exactly once.
//! 3. **Client** (`client`): owns the HTTP connection and the reader thread, and
//!    hands the consumer a channel of `StreamEvent`s.
//!
//! Retrying a dropped connection is the consumer's decision (`retry`).
//!
//! # Module Structure
//!
//! - `frame`: Frame markers and extracted frame containers
//! - `extract`: Marker scanning over the receive buffer
//! - `decode`: Frame decoders (full JPEG decode, header check, passthrough)
//! - `session`: Per-connection state and event production
//! - `client`: HTTP connection ownership, `start` / `stop`
//! - `multipart`: MJPEG multipart framing (writer side)
//! - `config`: Viewer configuration (file + env)
//! - `retry`: Reconnect backoff policy

pub mod client;
pub mod config;
pub mod decode;
pub mod extract;
pub mod frame;
pub mod multipart;
pub mod retry;
pub mod session;

pub use client::{StreamClient, StreamConfig};
pub use config::ViewerConfig;
#[cfg(feature = "jpeg")]
pub use decode::JpegDecoder;
pub use decode::{DecodeError, FrameDecoder, HeaderDecoder, PassthroughDecoder};
pub use extract::{ExtractorStats, FrameExtractor, DEFAULT_MAX_BUFFER_BYTES};
pub use frame::{ExtractedFrame, FrameInfo, FrameMarker};
pub use multipart::MultipartWriter;
pub use retry::Backoff;
pub use session::{SessionStats, StreamError, StreamEvent, StreamSession};
