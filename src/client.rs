//! HTTP MJPEG stream client.
//!
//! This module provides `StreamClient`, which owns at most one streaming
//! connection at a time and delivers `StreamEvent`s over a channel.
//!
//! The client is responsible for:
//! - Establishing the HTTP(S) connection within the connect timeout
//! - Reading the body on a dedicated thread, one chunk at a time, in order
//! - Treating a read stall longer than the idle timeout as a dead stream
//! - Tearing down the previous session before starting a new one
//!
//! The client MUST NOT:
//! - Retry failed connections (the consumer decides, see `retry`)
//! - Parse multipart headers (the extractor skips them as noise)
//! - Send events after `stop()` returns

use std::fmt::Display;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use url::Url;

use crate::decode::FrameDecoder;
use crate::extract::DEFAULT_MAX_BUFFER_BYTES;
use crate::session::{StreamError, StreamEvent, StreamSession};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_READ_CHUNK_BYTES: usize = 8192;

/// Configuration for a stream client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Receive buffer cap. Exceeding it without a frame clears the buffer.
    pub maximum_buffer_bytes: usize,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Time allowed between chunks before the stream is treated as dead.
    pub idle_timeout: Duration,
    /// Size of each read from the response body.
    pub read_chunk_bytes: usize,
    /// End the session after this many overflows in a row with no frame between.
    pub max_consecutive_overflows: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            maximum_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            max_consecutive_overflows: None,
        }
    }
}

/// MJPEG stream client.
///
/// `start` returns the receiving end of the session's event channel. The final
/// event of every session is `StreamEvent::SessionEnded`, unless the session was
/// stopped, in which case the channel simply disconnects.
pub struct StreamClient {
    config: StreamConfig,
    decoder: Arc<dyn FrameDecoder>,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    source: String,
    shared: Arc<SessionShared>,
}

/// State shared between the client and its reader thread.
struct SessionShared {
    cancelled: AtomicBool,
    finished: AtomicBool,
    sink: Mutex<Option<Sender<StreamEvent>>>,
}

impl SessionShared {
    fn new(sink: Sender<StreamEvent>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            sink: Mutex::new(Some(sink)),
        }
    }

    fn sink(&self) -> MutexGuard<'_, Option<Sender<StreamEvent>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends while holding the sink lock, so `cancel` cannot interleave.
    fn emit(&self, event: StreamEvent) {
        if let Some(sink) = self.sink().as_ref() {
            // A dropped receiver just means nobody is listening any more.
            let _ = sink.send(event);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sink().take();
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.sink().take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Cancels one session from any thread.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<SessionShared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.cancel();
    }
}

impl StreamClient {
    pub fn new(config: StreamConfig, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            config,
            decoder,
            active: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Connect to `url` and start reading on a background thread.
    ///
    /// Any active session is stopped first. Fails with `StreamError::Connect` if
    /// the URL is not http(s), the connection cannot be made within the connect
    /// timeout, or the server answers with an error status.
    pub fn start(&mut self, url: &str) -> Result<Receiver<StreamEvent>, StreamError> {
        self.stop();

        let parsed = Url::parse(url).map_err(|e| connect_error(url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(connect_error(
                url,
                format!("unsupported scheme '{}'; expected http(s)", parsed.scheme()),
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.config.connect_timeout)
            .timeout_read(self.config.idle_timeout)
            .build();
        let response = agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => connect_error(url, format!("http status {}", code)),
            other => connect_error(url, other),
        })?;

        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        if content_type.to_lowercase().contains("multipart") {
            log::info!("connected to {} ({})", url, content_type);
        } else {
            log::info!(
                "connected to {} (content type '{}'; scanning body as concatenated jpeg)",
                url,
                content_type
            );
        }
        self.spawn_reader(url, response.into_reader())
    }

    /// Run a session over an arbitrary byte source (stdin, a file, a test pipe).
    pub fn start_reader<R>(
        &mut self,
        source: &str,
        reader: R,
    ) -> Result<Receiver<StreamEvent>, StreamError>
    where
        R: Read + Send + 'static,
    {
        self.stop();
        log::info!("reading stream from {}", source);
        self.spawn_reader(source, reader)
    }

    /// Cancel the active session, if any. Idempotent.
    ///
    /// No event is sent after this returns. Events already queued in the
    /// channel may still be received and should be treated as stale.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.shared.cancel();
            log::info!("stopped stream {}", active.source);
        }
    }

    /// A handle that can cancel the current session from another thread.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.active.as_ref().map(|active| StopHandle {
            shared: active.shared.clone(),
        })
    }

    /// True while a session is running and has not ended or been stopped.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.shared.is_cancelled() && !active.shared.is_finished())
    }

    fn spawn_reader<R>(
        &mut self,
        source: &str,
        reader: R,
    ) -> Result<Receiver<StreamEvent>, StreamError>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(SessionShared::new(tx));
        let session = StreamSession::new(&self.config, self.decoder.clone());
        let chunk_bytes = self.config.read_chunk_bytes.max(1);
        let worker_shared = shared.clone();
        let worker_source = source.to_string();
        std::thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || {
                read_stream(reader, session, &worker_shared, chunk_bytes, &worker_source)
            })
            .map_err(|e| connect_error(source, e))?;

        self.active = Some(ActiveSession {
            source: source.to_string(),
            shared,
        });
        Ok(rx)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_stream<R: Read>(
    mut reader: R,
    mut session: StreamSession,
    shared: &SessionShared,
    chunk_bytes: usize,
    source: &str,
) {
    let mut chunk = vec![0u8; chunk_bytes];
    let error = loop {
        if shared.is_cancelled() {
            break None;
        }
        match reader.read(&mut chunk) {
            Ok(0) => break None,
            Ok(read) => {
                for event in session.on_data_received(&chunk[..read]) {
                    shared.emit(event);
                }
                if session.is_ended() {
                    break None;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => break Some(read_error(err)),
        }
    };

    if let Some(err) = &error {
        if !shared.is_cancelled() {
            log::warn!("stream {} failed: {}", source, err);
        }
    }
    if let Some(event) = session.on_stream_ended(error) {
        shared.emit(event);
    }
    shared.finish();

    let stats = session.stats();
    log::info!(
        "stream {} ended: {} frames delivered, {} dropped, {} bytes received, {} overflows",
        source,
        stats.frames_delivered,
        stats.frames_dropped,
        stats.bytes_received,
        stats.extractor.overflows
    );
}

fn read_error(err: io::Error) -> StreamError {
    let reason = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => format!("idle timeout: {}", err),
        _ => err.to_string(),
    };
    StreamError::Read { reason }
}

fn connect_error(url: &str, reason: impl Display) -> StreamError {
    StreamError::Connect {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PassthroughDecoder;
    use std::io::Cursor;
    use std::sync::mpsc::RecvTimeoutError;

    const WAIT: Duration = Duration::from_secs(5);

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn client() -> StreamClient {
        StreamClient::new(StreamConfig::default(), Arc::new(PassthroughDecoder))
    }

    /// Blocking reader fed by the test.
    struct PipeReader(Receiver<Vec<u8>>);

    impl Read for PipeReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    struct ResetReader {
        sent: bool,
    }

    impl Read for ResetReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
            }
            self.sent = true;
            let frame = jpeg(b"only");
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }
    }

    #[test]
    fn reader_session_delivers_frames_then_ends() {
        let mut stream = jpeg(b"one");
        stream.extend_from_slice(b"\r\n--frame\r\n");
        stream.extend(jpeg(b"two"));

        let mut client = client();
        let events = client
            .start_reader("test", Cursor::new(stream))
            .expect("start reader");

        let received: Vec<StreamEvent> = events.iter().collect();
        assert_eq!(received.len(), 4);
        assert!(matches!(&received[0], StreamEvent::Frame(f) if f.bytes() == jpeg(b"one")));
        assert_eq!(received[1], StreamEvent::FirstFrame { success: true });
        assert!(matches!(&received[2], StreamEvent::Frame(f) if f.bytes() == jpeg(b"two")));
        assert_eq!(received[3], StreamEvent::SessionEnded(None));
        assert!(!client.is_active());
    }

    #[test]
    fn read_failure_ends_session_with_error() {
        let mut client = client();
        let events = client
            .start_reader("reset", ResetReader { sent: false })
            .expect("start reader");
        let received: Vec<StreamEvent> = events.iter().collect();
        assert!(matches!(
            received.last(),
            Some(StreamEvent::SessionEnded(Some(StreamError::Read { .. })))
        ));
    }

    #[test]
    fn no_events_after_stop() {
        let (feed, pipe) = mpsc::channel();
        let mut client = client();
        let events = client
            .start_reader("pipe", PipeReader(pipe))
            .expect("start reader");

        feed.send(jpeg(b"first")).expect("feed");
        assert!(matches!(
            events.recv_timeout(WAIT),
            Ok(StreamEvent::Frame(_))
        ));
        assert_eq!(
            events.recv_timeout(WAIT),
            Ok(StreamEvent::FirstFrame { success: true })
        );
        assert!(client.is_active());

        client.stop();
        client.stop();
        assert!(!client.is_active());
        assert_eq!(
            events.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        );

        // The reader thread wakes up after cancellation and must stay silent.
        let _ = feed.send(jpeg(b"second"));
        assert_eq!(
            events.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn stop_handle_cancels_from_another_thread() {
        let (_feed, pipe) = mpsc::channel::<Vec<u8>>();
        let mut client = client();
        let events = client
            .start_reader("pipe", PipeReader(pipe))
            .expect("start reader");
        let handle = client.stop_handle().expect("active session");

        std::thread::spawn(move || handle.stop())
            .join()
            .expect("stop thread");
        assert!(!client.is_active());
        assert_eq!(
            events.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let mut client = client();
        client.stop();
        client.stop();
        assert!(!client.is_active());
        assert!(client.stop_handle().is_none());
    }

    #[test]
    fn rejects_non_http_urls() {
        let mut client = client();
        assert!(matches!(
            client.start("rtsp://camera/stream"),
            Err(StreamError::Connect { .. })
        ));
        assert!(matches!(
            client.start("not a url"),
            Err(StreamError::Connect { .. })
        ));
    }
}
