use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Result;
use tokio::fs;
use tokio::process::Command;
use tracing::{error, info};

// RIFF/WAVE header size; anything not larger carries no samples
const WAV_HEADER_LEN: u64 = 44;

/// Converts arbitrary media into 16kHz mono PCM WAV with ffmpeg.
#[derive(Debug, Clone)]
pub struct AudioConverter {
    ffmpeg: String,
}

impl AudioConverter {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    pub async fn to_wav(&self, input: &Path) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let output = input.with_file_name(format!("{}.16k.wav", stem));
        info!("Converting {:?} to WAV format", input);

        let result = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-vn", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
            .arg(&output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.ffmpeg, e))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            error!("FFmpeg conversion failed: {}", stderr.trim());
            return Err(anyhow::anyhow!(
                "FFmpeg conversion failed ({}): {}",
                result.status,
                stderr.trim()
            ));
        }

        info!("Converted audio written to {:?}", output);
        Ok(output)
    }
}

/// Rejects missing or sample-less audio files before transcription.
pub async fn validate_audio(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| anyhow::anyhow!("Audio file not readable: {}", e))?;
    if metadata.len() <= WAV_HEADER_LEN {
        return Err(anyhow::anyhow!("Invalid audio file generated"));
    }
    Ok(())
}
