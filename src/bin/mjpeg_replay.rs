//! mjpeg_replay - Serve JPEG files as a Pi car style MJPEG stream.
//!
//! Stands in for the car's camera server so the viewer can be exercised without
//! hardware. Every client gets the same `multipart/x-mixed-replace` body the car
//! produces, looping over the loaded frames at the configured rate. With no
//! frames available a dark placeholder frame is served instead.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use picar_stream::multipart::{content_type, placeholder_jpeg, MultipartWriter, DEFAULT_BOUNDARY};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve JPEG files as an MJPEG stream")]
struct Args {
    /// Listen address.
    #[arg(long, env = "PICAR_REPLAY_ADDR", default_value = "0.0.0.0:5000")]
    addr: String,

    /// Directory of .jpg/.jpeg files, served in name order.
    #[arg(long, env = "PICAR_REPLAY_DIR")]
    dir: Option<PathBuf>,

    /// Frames per second.
    #[arg(long, default_value_t = 20)]
    fps: u32,

    /// Stream route.
    #[arg(long, default_value = "/video")]
    route: String,

    /// Multipart boundary.
    #[arg(long, default_value = DEFAULT_BOUNDARY)]
    boundary: String,

    /// Placeholder frame width when no files are loaded.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Placeholder frame height when no files are loaded.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

struct ReplayConfig {
    route: String,
    boundary: String,
    interval: Duration,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("--fps must be greater than zero"));
    }

    let frames = Arc::new(load_frames(args.dir.as_deref(), args.width, args.height)?);
    let cfg = Arc::new(ReplayConfig {
        route: args.route.clone(),
        boundary: args.boundary.clone(),
        interval: Duration::from_secs(1) / args.fps,
    });

    let listener =
        TcpListener::bind(&args.addr).with_context(|| format!("bind {}", args.addr))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || shutdown_handler.store(true, Ordering::SeqCst))
        .context("install ctrl-c handler")?;

    log::info!(
        "serving {} frame(s) on http://{}{} at {} fps",
        frames.len(),
        addr,
        cfg.route,
        args.fps
    );

    let clients = Arc::new(AtomicUsize::new(0));
    let mut next_client_id = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                next_client_id += 1;
                let id = next_client_id;
                let frames = frames.clone();
                let cfg = cfg.clone();
                let clients = clients.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_client(stream, id, &frames, &cfg, &clients, &shutdown)
                    {
                        log::warn!("client #{} ({}) error: {}", id, peer, err);
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    log::info!("replay server stopped");
    Ok(())
}

fn load_frames(dir: Option<&Path>, width: u32, height: u32) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    if let Some(dir) = dir {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
            })
            .collect();
        paths.sort();

        for path in paths {
            let bytes =
                std::fs::read(&path).with_context(|| format!("read frame {}", path.display()))?;
            if !bytes.starts_with(&[0xFF, 0xD8]) {
                log::warn!("skipping {}: not a jpeg", path.display());
                continue;
            }
            frames.push(bytes);
        }
    }

    if frames.is_empty() {
        log::warn!("no frames loaded; serving placeholder frame");
        frames.push(placeholder_jpeg(width, height)?);
    }
    Ok(frames)
}

fn handle_client(
    mut stream: TcpStream,
    id: u64,
    frames: &[Vec<u8>],
    cfg: &ReplayConfig,
    clients: &AtomicUsize,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let (method, path) = read_request_line(&mut stream)?;
    if method != "GET" {
        write_status(&mut stream, "405 Method Not Allowed")?;
        return Ok(());
    }
    if path != cfg.route {
        write_status(&mut stream, "404 Not Found")?;
        return Ok(());
    }

    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache, private\r\nPragma: no-cache\r\nConnection: close\r\n\r\n",
        content_type(&cfg.boundary)
    )?;

    let connected = clients.fetch_add(1, Ordering::SeqCst) + 1;
    log::info!("client #{} connected (total clients: {})", id, connected);

    let mut writer = MultipartWriter::new(stream).with_boundary(cfg.boundary.clone());
    let result = stream_frames(&mut writer, frames, cfg.interval, shutdown);

    let remaining = clients.fetch_sub(1, Ordering::SeqCst) - 1;
    log::info!(
        "client #{} stopped after {} frames (remaining clients: {})",
        id,
        writer.parts_written(),
        remaining
    );
    result
}

fn stream_frames<W: Write>(
    writer: &mut MultipartWriter<W>,
    frames: &[Vec<u8>],
    interval: Duration,
    shutdown: &AtomicBool,
) -> Result<()> {
    for frame in frames.iter().cycle() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let started = Instant::now();
        match writer.write_part(frame) {
            Ok(()) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                break;
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    Ok(())
}

fn read_request_line(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut request = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        if request.len() >= MAX_REQUEST_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let read = stream.read(&mut buf)?;
        if read == 0 {
            break;
        }
        request.extend_from_slice(&buf[..read]);
    }

    let text = String::from_utf8_lossy(&request);
    let line = text
        .lines()
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing request method"))?
        .to_string();
    let target = parts.next().ok_or_else(|| anyhow!("missing request path"))?;
    let path = target.split('?').next().unwrap_or(target).to_string();
    Ok((method, path))
}

fn write_status(stream: &mut TcpStream, status: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    )
}
