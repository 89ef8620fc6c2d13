//! Viewer configuration.
//!
//! Defaults, then an optional JSON file named by `PICAR_STREAM_CONFIG`, then
//! `PICAR_*` environment overrides. The result is validated before use.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::client::StreamConfig;

const DEFAULT_STREAM_URL: &str = "http://raspberrypi.local:5000/video";
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 30;
const MIN_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize, Default)]
struct ViewerConfigFile {
    url: Option<String>,
    stream: Option<StreamConfigFile>,
    retry: Option<RetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    maximum_buffer_bytes: Option<usize>,
    connect_timeout_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
    read_chunk_bytes: Option<usize>,
    max_consecutive_overflows: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    delay_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub url: String,
    pub stream: StreamConfig,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub delay: Duration,
    pub backoff_max: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl ViewerConfig {
    /// Defaults, then the JSON file named by `PICAR_STREAM_CONFIG`, then `PICAR_*` env.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PICAR_STREAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replace the stream URL (e.g. from the command line) and re-validate.
    pub fn set_url(&mut self, url: impl Into<String>) -> Result<()> {
        self.url = url.into();
        self.validate()
    }

    fn from_file(file: ViewerConfigFile) -> Self {
        let defaults = StreamConfig::default();
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamConfig {
            maximum_buffer_bytes: stream_file
                .maximum_buffer_bytes
                .unwrap_or(defaults.maximum_buffer_bytes),
            connect_timeout: stream_file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            idle_timeout: stream_file
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            read_chunk_bytes: stream_file
                .read_chunk_bytes
                .unwrap_or(defaults.read_chunk_bytes),
            max_consecutive_overflows: stream_file.max_consecutive_overflows,
        };
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetrySettings {
            delay: Duration::from_secs(retry_file.delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)),
            backoff_max: Duration::from_secs(
                retry_file
                    .backoff_max_secs
                    .unwrap_or(DEFAULT_BACKOFF_MAX_SECS),
            ),
            max_retries: retry_file.max_retries,
        };
        Self {
            url: file.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            stream,
            retry,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PICAR_STREAM_URL") {
            if !url.trim().is_empty() {
                self.url = url.trim().to_string();
            }
        }
        if let Some(bytes) = env_number::<usize>("PICAR_MAX_BUFFER_BYTES")? {
            self.stream.maximum_buffer_bytes = bytes;
        }
        if let Some(secs) = env_number::<u64>("PICAR_CONNECT_TIMEOUT_SECS")? {
            self.stream.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("PICAR_IDLE_TIMEOUT_SECS")? {
            self.stream.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("PICAR_RETRY_DELAY_SECS")? {
            self.retry.delay = Duration::from_secs(secs);
        }
        if let Some(retries) = env_number::<u32>("PICAR_MAX_RETRIES")? {
            self.retry.max_retries = Some(retries);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| anyhow!("invalid stream url '{}': {}", self.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "stream url must be http(s), got '{}'",
                url.scheme()
            ));
        }
        if self.stream.maximum_buffer_bytes < MIN_BUFFER_BYTES {
            return Err(anyhow!(
                "maximum buffer must be at least {} bytes",
                MIN_BUFFER_BYTES
            ));
        }
        if self.stream.connect_timeout.is_zero() || self.stream.idle_timeout.is_zero() {
            return Err(anyhow!("stream timeouts must be greater than zero"));
        }
        if self.stream.read_chunk_bytes == 0 {
            return Err(anyhow!("read chunk size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_pi_server() {
        let cfg = ViewerConfig::from_file(ViewerConfigFile::default());
        assert_eq!(cfg.url, "http://raspberrypi.local:5000/video");
        assert_eq!(Url::parse(&cfg.url).map(|u| u.path().to_string()), Ok("/video".to_string()));
        assert_eq!(cfg.stream, StreamConfig::default());
        assert_eq!(cfg.retry.delay, Duration::from_secs(2));
        assert_eq!(cfg.retry.max_retries, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_buffer_and_bad_scheme() {
        let mut cfg = ViewerConfig::from_file(ViewerConfigFile::default());
        cfg.stream.maximum_buffer_bytes = 1024;
        assert!(cfg.validate().is_err());

        let mut cfg = ViewerConfig::from_file(ViewerConfigFile::default());
        assert!(cfg.set_url("ftp://raspberrypi.local/video").is_err());
        assert!(cfg.set_url("http://10.0.0.7:5000/video").is_ok());
    }
}
