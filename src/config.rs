use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::client::{ReconnectPolicy, Transport};

const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_STT_COMMAND: &str = "whisper-cli -m ./models/ggml-small.bin -nt -f";
const DEFAULT_DOWNLOADER_COMMAND: &str = "yt-dlp -f best --no-playlist --no-progress -o %(id)s.%(ext)s";

pub static LOG_DIR: Lazy<String> =
    Lazy::new(|| env_value("TRANSCRIBE_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()));

/// Process environment first, then `.env`.
pub fn env_value(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_value(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        _ => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_concurrent_jobs: usize,
    pub job_timeout: Option<Duration>,
    // how long finished tasks stay joinable
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub event_buffer: usize,
    pub submissions_per_minute: u32,
    pub ffmpeg: String,
    pub stt_command: String,
    // None: direct GET only
    pub downloader_command: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_concurrent_jobs: 2,
            job_timeout: None,
            retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            event_buffer: 64,
            submissions_per_minute: 30,
            ffmpeg: "ffmpeg".to_string(),
            stt_command: DEFAULT_STT_COMMAND.to_string(),
            downloader_command: Some(DEFAULT_DOWNLOADER_COMMAND.to_string()),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let job_timeout_secs: u64 = parse_or("TRANSCRIBE_JOB_TIMEOUT_SECS", 0)?;
        Ok(Self {
            bind_addr: parse_or("TRANSCRIBE_BIND", DEFAULT_BIND.parse::<SocketAddr>()?)?,
            max_concurrent_jobs: parse_or("TRANSCRIBE_MAX_JOBS", 2)?,
            job_timeout: (job_timeout_secs > 0).then(|| Duration::from_secs(job_timeout_secs)),
            retention: Duration::from_secs(parse_or("TRANSCRIBE_RETENTION_SECS", 3600)?),
            cleanup_interval: Duration::from_secs(parse_or("TRANSCRIBE_CLEANUP_INTERVAL_SECS", 60)?),
            event_buffer: parse_or("TRANSCRIBE_EVENT_BUFFER", 64)?,
            submissions_per_minute: parse_or("TRANSCRIBE_SUBMISSIONS_PER_MINUTE", 30)?,
            ffmpeg: env_value("TRANSCRIBE_FFMPEG").unwrap_or_else(|| "ffmpeg".to_string()),
            stt_command: env_value("TRANSCRIBE_STT_COMMAND")
                .unwrap_or_else(|| DEFAULT_STT_COMMAND.to_string()),
            downloader_command: downloader_command(env_value("TRANSCRIBE_DOWNLOADER_COMMAND")),
        })
    }
}

/// Unset means the default tool, an empty value turns it off.
fn downloader_command(raw: Option<String>) -> Option<String> {
    match raw {
        None => Some(DEFAULT_DOWNLOADER_COMMAND.to_string()),
        Some(command) if command.trim().is_empty() => None,
        Some(command) => Some(command.trim().to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: reqwest::Url,
    pub transport: Transport,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(server_url: reqwest::Url, transport: Transport) -> Self {
        Self {
            server_url,
            transport,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = ReconnectPolicy::default();
        let server_url = env_value("TRANSCRIBE_SERVER_URL")
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        Ok(Self {
            server_url: reqwest::Url::parse(&server_url)
                .map_err(|e| anyhow::anyhow!("Invalid TRANSCRIBE_SERVER_URL {:?}: {}", server_url, e))?,
            transport: parse_or("TRANSCRIBE_TRANSPORT", Transport::WebSocket)?,
            reconnect: ReconnectPolicy {
                max_attempts: parse_or("TRANSCRIBE_RECONNECT_ATTEMPTS", defaults.max_attempts)?,
                initial_backoff: Duration::from_millis(parse_or(
                    "TRANSCRIBE_RECONNECT_BACKOFF_MS",
                    defaults.initial_backoff.as_millis() as u64,
                )?),
                max_backoff: Duration::from_millis(parse_or(
                    "TRANSCRIBE_RECONNECT_MAX_BACKOFF_MS",
                    defaults.max_backoff.as_millis() as u64,
                )?),
            },
        })
    }
}
