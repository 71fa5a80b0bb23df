use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::protocol::TaskStatus;
use crate::schedule::reporter::ProgressSink;

// report at most every 5%
const PROGRESS_STEP: u8 = 5;

/// Streams `url` into `dest_dir`, reporting `downloading` progress by bytes
/// when the server sends a content length.
pub async fn download_media(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf> {
    info!("Starting download from URL: {}", url);

    let dest_path = dest_dir.join(file_name_from_url(url));
    if !dest_dir.exists() {
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create directory: {}", e))?;
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "HTTP request failed with status: {}",
            response.status()
        ));
    }

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = fs::File::create(&dest_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create file: {}", e))?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut reported: u8 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| anyhow::anyhow!("Failed to read response: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write file: {}", e))?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total {
            let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
            if percent >= reported.saturating_add(PROGRESS_STEP) && percent < 100 {
                reported = percent;
                sink.stage(TaskStatus::Downloading, percent).await?;
            }
        }
    }
    file.flush().await?;

    if downloaded == 0 {
        return Err(anyhow::anyhow!("Downloaded file is empty"));
    }

    debug!(bytes = downloaded, path = ?dest_path, "Download finished");
    sink.stage(TaskStatus::Downloading, 100).await?;
    info!("Download completed successfully");
    Ok(dest_path)
}

/// Last path segment of the URL, restricted to a safe character set.
fn file_name_from_url(url: &str) -> String {
    let segment = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_default();

    let cleaned: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "source.media".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Resolves video page URLs (hosting sites, not direct media links) with an
/// external tool such as yt-dlp.
///
/// The tool runs inside `dest_dir` with the URL as its last argument; the
/// largest file it leaves there is taken as the downloaded media.
#[derive(Debug, Clone)]
pub struct CommandDownloader {
    program: String,
    args: Vec<String>,
}

impl CommandDownloader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace separated command line such as
    /// `yt-dlp -f best --no-playlist -o %(id)s.%(ext)s`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Downloader command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create directory: {}", e))?;
        info!("Fetching {} with {}", url, self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .current_dir(dest_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Downloader exited with {}: {}", output.status, stderr.trim());
            return Err(anyhow::anyhow!("{} failed: {}", self.program, stderr.trim()));
        }

        let path = largest_file(dest_dir)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{} produced no file", self.program))?;
        debug!(path = ?path, "Downloader finished");
        Ok(path)
    }
}

async fn largest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut largest: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() || metadata.len() == 0 {
            continue;
        }
        if largest.as_ref().map_or(true, |(len, _)| metadata.len() > *len) {
            largest = Some((metadata.len(), entry.path()));
        }
    }
    Ok(largest.map(|(_, path)| path))
}
