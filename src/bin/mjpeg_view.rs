//! mjpeg_view - Watch the Pi car camera feed.
//!
//! This tool:
//! 1. Connects to the car's MJPEG endpoint (or reads an MJPEG body from stdin)
//! 2. Shows a "connecting" stage until the first frame arrives
//! 3. Logs frame rate and throughput while the stream runs
//! 4. Optionally writes frames to a directory
//! 5. Reconnects with exponential backoff when the stream drops

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "jpeg")]
use picar_stream::JpegDecoder;
use picar_stream::{
    Backoff, ExtractedFrame, FrameDecoder, HeaderDecoder, PassthroughDecoder, StreamClient,
    StreamEvent, ViewerConfig,
};

#[path = "../ui.rs"]
mod ui;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DecoderKind {
    /// Decode every frame.
    Full,
    /// Check the JPEG segment structure only.
    Header,
    /// Accept every marker-delimited frame.
    Passthrough,
}

impl DecoderKind {
    fn build(self) -> Arc<dyn FrameDecoder> {
        match self {
            #[cfg(feature = "jpeg")]
            DecoderKind::Full => Arc::new(JpegDecoder),
            #[cfg(not(feature = "jpeg"))]
            DecoderKind::Full => {
                log::warn!("built without jpeg support; validating headers only");
                Arc::new(HeaderDecoder)
            }
            DecoderKind::Header => Arc::new(HeaderDecoder),
            DecoderKind::Passthrough => Arc::new(PassthroughDecoder),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch the Pi car MJPEG camera feed")]
struct Args {
    /// Stream URL, or '-' to read an MJPEG body from stdin.
    /// Overrides PICAR_STREAM_URL and the config file.
    #[arg(long)]
    url: Option<String>,

    /// Directory to write received frames into.
    #[arg(long, env = "PICAR_SAVE_DIR")]
    save_dir: Option<PathBuf>,

    /// Save every Nth received frame.
    #[arg(long, default_value_t = 1)]
    save_every: u64,

    /// Exit after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// How much checking each frame gets before it counts as received.
    #[arg(long, value_enum, default_value = "full")]
    decoder: DecoderKind,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = ViewerConfig::load()?;
    let from_stdin = args.url.as_deref() == Some("-");
    if let Some(url) = args.url.as_deref().filter(|url| *url != "-") {
        cfg.set_url(url)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst))
        .context("install ctrl-c handler")?;

    let mut recorder = FrameRecorder::new(args.save_dir.clone(), args.save_every)?;
    let mut client = StreamClient::new(cfg.stream.clone(), args.decoder.build());
    let mut backoff = Backoff::new(
        cfg.retry.delay,
        cfg.retry.backoff_max,
        cfg.retry.max_retries,
    );
    let mut total_frames = 0u64;

    while running.load(Ordering::SeqCst) {
        let source = if from_stdin { "stdin" } else { cfg.url.as_str() };
        let stage = ui.stage(&format!("Connecting to {}", source));
        let started = if from_stdin {
            client.start_reader("stdin", std::io::stdin())
        } else {
            client.start(&cfg.url)
        };

        let outcome = match started {
            Ok(events) => watch_session(
                &events,
                stage,
                &running,
                &mut recorder,
                &mut total_frames,
                args.max_frames,
            )?,
            Err(err) => {
                stage.fail(&err.to_string());
                log::warn!("{}", err);
                SessionOutcome::default()
            }
        };
        client.stop();

        if outcome.done || from_stdin || !running.load(Ordering::SeqCst) {
            break;
        }
        if outcome.frames > 0 {
            backoff.reset();
        }
        let Some(delay) = backoff.next_delay() else {
            return Err(anyhow!(
                "giving up on {} after {} reconnect attempts",
                cfg.url,
                backoff.attempts()
            ));
        };
        log::info!("reconnecting in {:.1}s", delay.as_secs_f64());
        sleep_while_running(delay, &running);
    }

    log::info!("received {} frames", total_frames);
    Ok(())
}

#[derive(Debug, Default)]
struct SessionOutcome {
    frames: u64,
    /// Stop requested or frame limit reached; do not reconnect.
    done: bool,
}

fn watch_session(
    events: &Receiver<StreamEvent>,
    stage: ui::StageGuard,
    running: &AtomicBool,
    recorder: &mut FrameRecorder,
    total_frames: &mut u64,
    max_frames: Option<u64>,
) -> Result<SessionOutcome> {
    let mut stage = Some(stage);
    let mut meter = RateMeter::new();
    let mut outcome = SessionOutcome::default();

    loop {
        if !running.load(Ordering::SeqCst) {
            outcome.done = true;
            return Ok(outcome);
        }
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(StreamEvent::Frame(frame)) => {
                outcome.frames += 1;
                *total_frames += 1;
                meter.record(&frame);
                recorder.record(*total_frames, &frame)?;
                if max_frames.is_some_and(|max| *total_frames >= max) {
                    outcome.done = true;
                    return Ok(outcome);
                }
            }
            Ok(StreamEvent::FirstFrame { success: true }) => {
                drop(stage.take());
            }
            Ok(StreamEvent::FirstFrame { success: false }) => {
                if let Some(stage) = stage.take() {
                    stage.fail("first frame could not be decoded");
                }
            }
            Ok(StreamEvent::SessionEnded(err)) => {
                let reason = match &err {
                    Some(err) => err.to_string(),
                    None => "stream closed by server".to_string(),
                };
                if let Some(stage) = stage.take() {
                    stage.fail(&reason);
                }
                log::warn!("stream ended after {} frames: {}", outcome.frames, reason);
                return Ok(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(outcome),
        }
        meter.maybe_log();
    }
}

struct RateMeter {
    window_start: Instant,
    frames: u64,
    bytes: u64,
    dimensions: Option<(u32, u32)>,
}

impl RateMeter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            bytes: 0,
            dimensions: None,
        }
    }

    fn record(&mut self, frame: &ExtractedFrame) {
        self.frames += 1;
        self.bytes += frame.len() as u64;
        if frame.dimensions().is_some() {
            self.dimensions = frame.dimensions();
        }
    }

    fn maybe_log(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed < STATS_INTERVAL {
            return;
        }
        let secs = elapsed.as_secs_f64();
        let size = match self.dimensions {
            Some((w, h)) => format!("{}x{}", w, h),
            None => "unknown size".to_string(),
        };
        log::info!(
            "{:.1} fps, {:.0} KiB/s, {}",
            self.frames as f64 / secs,
            self.bytes as f64 / 1024.0 / secs,
            size
        );
        self.window_start = Instant::now();
        self.frames = 0;
        self.bytes = 0;
    }
}

struct FrameRecorder {
    dir: Option<PathBuf>,
    every: u64,
}

impl FrameRecorder {
    fn new(dir: Option<PathBuf>, every: u64) -> Result<Self> {
        if let Some(dir) = &dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create frame directory {}", dir.display()))?;
        }
        Ok(Self {
            dir,
            every: every.max(1),
        })
    }

    fn record(&mut self, index: u64, frame: &ExtractedFrame) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if index % self.every != 0 {
            return Ok(());
        }
        let path = dir.join(format!("frame_{:06}.jpg", index));
        std::fs::write(&path, frame.bytes())
            .with_context(|| format!("write frame {}", path.display()))
    }
}

fn sleep_while_running(delay: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
