use std::path::Path;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Speech-to-text backend. Takes a 16kHz mono WAV, returns plain text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// Runs an external speech-to-text program with the audio path as its last
/// argument and takes its stdout as the transcription.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace separated command line such as
    /// `whisper-cli -m ./models/ggml-small.bin -nt -f`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Transcriber command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        info!("Starting transcription of {:?} with {}", audio, self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Transcriber exited with {}: {}", output.status, stderr.trim());
            return Err(anyhow::anyhow!("Transcription failed: {}", stderr.trim()));
        }

        let text = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if text.is_empty() {
            return Err(anyhow::anyhow!("Transcriber produced no text"));
        }
        info!("Transcription completed successfully");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let t = CommandTranscriber::from_command_line("whisper-cli -m model.bin -nt -f").unwrap();
        assert_eq!(t.program, "whisper-cli");
        assert_eq!(t.args, vec!["-m", "model.bin", "-nt", "-f"]);
        assert!(CommandTranscriber::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_stdout_becomes_transcription() {
        // the audio path lands in $0 of the shell script
        let t = CommandTranscriber::new(
            "sh",
            vec!["-c".into(), "printf ' hello\\n\\n world \\n'".into()],
        );
        let text = t.transcribe(Path::new("/tmp/audio.wav")).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let t = CommandTranscriber::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let err = t.transcribe(Path::new("/tmp/audio.wav")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let silent = CommandTranscriber::new("sh", vec!["-c".into(), "true".into()]);
        assert!(silent.transcribe(Path::new("/tmp/audio.wav")).await.is_err());
    }
}
