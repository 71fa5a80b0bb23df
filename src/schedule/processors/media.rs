use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::JobPipeline;
use crate::media::{download_media, validate_audio, AudioConverter, CommandDownloader, Transcriber};
use crate::protocol::TaskStatus;
use crate::schedule::reporter::ProgressSink;
use crate::schedule::types::TaskUpdate;

const TRANSCRIBE_START: u8 = 50;
const TRANSCRIBE_CEILING: u8 = 90;
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// download → convert → validate → transcribe, inside a scratch directory
/// that is removed when the job ends.
pub struct MediaPipeline {
    http: reqwest::Client,
    // page URL resolver, the direct GET is the fallback
    downloader: Option<CommandDownloader>,
    converter: AudioConverter,
    transcriber: Arc<dyn Transcriber>,
    // interval of the progress heartbeat while the transcriber runs
    heartbeat: Duration,
}

impl MediaPipeline {
    pub fn new(converter: AudioConverter, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            http: reqwest::Client::new(),
            downloader: None,
            converter,
            transcriber,
            heartbeat: Duration::from_secs(5),
        }
    }

    pub fn with_downloader(mut self, downloader: Option<CommandDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Interval of the transcribing heartbeat, never below 10ms.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.max(MIN_HEARTBEAT);
        self
    }

    async fn fetch(&self, source: &str, workdir: &Path, sink: &dyn ProgressSink) -> Result<PathBuf> {
        if let Some(downloader) = &self.downloader {
            match downloader.fetch(source, &workdir.join("fetch")).await {
                Ok(path) => {
                    sink.stage(TaskStatus::Downloading, 100).await?;
                    return Ok(path);
                }
                Err(e) => warn!(
                    "{} could not fetch {}, trying a direct download: {:#}",
                    downloader.program(),
                    source,
                    e
                ),
            }
        }
        download_media(&self.http, source, workdir, sink).await
    }
}

#[async_trait]
impl JobPipeline for MediaPipeline {
    fn name(&self) -> &str {
        "media"
    }

    async fn run(&self, source: &str, sink: &dyn ProgressSink) -> Result<String> {
        let workdir = tempfile::tempdir().context("Failed to create working directory")?;
        info!("Processing video URL: {}", source);

        sink.stage(TaskStatus::Downloading, 0).await?;
        let video = self
            .fetch(source, workdir.path(), sink)
            .await
            .context("Failed to download video")?;

        sink.stage(TaskStatus::Converting, 0).await?;
        let audio = self
            .converter
            .to_wav(&video)
            .await
            .context("Failed to convert video to audio")?;
        validate_audio(&audio).await?;
        sink.stage(TaskStatus::Converting, 100).await?;

        sink.report(
            TaskUpdate::new(TaskStatus::Transcribing, TRANSCRIBE_START)
                .with_message("Starting transcription (this may take several minutes)..."),
        )
        .await?;

        // the backend reports nothing, so tick progress up while it runs
        let transcription = self.transcriber.transcribe(&audio);
        tokio::pin!(transcription);
        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.tick().await;
        let mut progress = TRANSCRIBE_START;

        let text = loop {
            tokio::select! {
                result = &mut transcription => break result?,
                _ = ticker.tick() => {
                    if progress < TRANSCRIBE_CEILING {
                        progress += 5;
                        sink.stage(TaskStatus::Transcribing, progress).await?;
                    }
                }
            }
        };

        Ok(text)
    }
}
