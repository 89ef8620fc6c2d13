//! Stream sessions.
//!
//! A `StreamSession` is one logical connection attempt. It owns the receive
//! buffer (via `FrameExtractor`), the decoder and the first-frame flag, and it
//! converts inbound chunks into `StreamEvent`s.
//!
//! All mutation goes through `on_data_received` / `on_stream_ended`. Callers must
//! deliver chunks for one session serially and in arrival order; the client's
//! reader thread does this by construction.

use std::sync::Arc;

use thiserror::Error;

use crate::client::StreamConfig;
use crate::decode::FrameDecoder;
use crate::extract::{ExtractorStats, FrameExtractor};
use crate::frame::ExtractedFrame;

/// Terminal session errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport could not be established (DNS, refused, connect timeout, HTTP error status).
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    /// Established stream was reset or went idle.
    #[error("stream read failed: {reason}")]
    Read { reason: String },
    /// Consecutive overflow limit reached without a single frame.
    #[error("receive buffer overflowed {consecutive} times without a frame")]
    BufferOverflow { consecutive: u32 },
}

/// Consumer-facing output of a session.
///
/// Events are produced on the client's reader thread; consumers that update UI
/// state must marshal them onto their own context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One extracted frame that passed decoding.
    Frame(ExtractedFrame),
    /// One-shot: the session's first extracted frame did (or did not) decode.
    FirstFrame { success: bool },
    /// No further events follow. `None` means the source closed cleanly.
    SessionEnded(Option<StreamError>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_received: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub extractor: ExtractorStats,
}

pub struct StreamSession {
    extractor: FrameExtractor,
    decoder: Arc<dyn FrameDecoder>,
    overflow_limit: Option<u32>,
    first_frame_signalled: bool,
    ended: bool,
    bytes_received: u64,
    frames_delivered: u64,
    frames_dropped: u64,
}

impl StreamSession {
    pub fn new(config: &StreamConfig, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            extractor: FrameExtractor::new(config.maximum_buffer_bytes),
            decoder,
            overflow_limit: config.max_consecutive_overflows,
            first_frame_signalled: false,
            ended: false,
            bytes_received: 0,
            frames_delivered: 0,
            frames_dropped: 0,
        }
    }

    /// Append a chunk and run extraction. Returns the events it produced, in order.
    ///
    /// Ignored once the session has ended.
    pub fn on_data_received(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.ended || chunk.is_empty() {
            return events;
        }
        self.bytes_received += chunk.len() as u64;

        for frame in self.extractor.push_chunk(chunk) {
            match self.decoder.decode(frame.bytes()) {
                Ok(info) => {
                    self.frames_delivered += 1;
                    events.push(StreamEvent::Frame(frame.with_info(info)));
                    if !self.first_frame_signalled {
                        self.first_frame_signalled = true;
                        events.push(StreamEvent::FirstFrame { success: true });
                    }
                }
                Err(err) => {
                    self.frames_dropped += 1;
                    log::debug!("dropping undecodable frame ({} bytes): {}", frame.len(), err);
                    if !self.first_frame_signalled {
                        self.first_frame_signalled = true;
                        events.push(StreamEvent::FirstFrame { success: false });
                    }
                }
            }
        }

        if let Some(limit) = self.overflow_limit {
            let consecutive = self.extractor.stats().consecutive_overflows;
            if limit > 0 && consecutive >= limit {
                log::warn!(
                    "ending stream session: {} consecutive buffer overflows",
                    consecutive
                );
                events.extend(self.on_stream_ended(Some(StreamError::BufferOverflow {
                    consecutive,
                })));
            }
        }
        events
    }

    /// Terminate the session. Yields `SessionEnded` exactly once.
    pub fn on_stream_ended(&mut self, error: Option<StreamError>) -> Option<StreamEvent> {
        if self.ended {
            return None;
        }
        self.ended = true;
        self.extractor.discard_pending();
        Some(StreamEvent::SessionEnded(error))
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn buffered_len(&self) -> usize {
        self.extractor.buffered_len()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_received: self.bytes_received,
            frames_delivered: self.frames_delivered,
            frames_dropped: self.frames_dropped,
            extractor: self.extractor.stats().clone(),
        }
    }
}
