//! Wire types shared by the server and the client.
//!
//! Every progress payload carries at least `task_id`, `status` and
//! `progress`; `message` overrides the default per-state text and
//! `transcription` is only present on `completed`.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Lifecycle state of a task, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Converting,
    Transcribing,
    Completed,
    Error,
}

impl TaskStatus {
    /// Position along `queued → downloading → converting → transcribing →
    /// completed`. `error` shares the terminal rank.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Converting => 2,
            TaskStatus::Transcribing => 3,
            TaskStatus::Completed | TaskStatus::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Whether moving from `self` to `next` respects the state ordering.
    /// Staying in the same non-terminal state is allowed; `error` is
    /// reachable from any non-terminal state.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == TaskStatus::Error || next.rank() >= self.rank()
    }

    /// Message shown when the server did not send one.
    pub fn default_message(self, progress: u8) -> String {
        match self {
            TaskStatus::Queued => "Waiting for the job to start".to_string(),
            TaskStatus::Downloading => format!("Downloading video ({}%)", progress),
            TaskStatus::Converting => format!("Converting video to audio ({}%)", progress),
            TaskStatus::Transcribing => format!("Transcribing audio ({}%)", progress),
            TaskStatus::Completed => "Transcription completed successfully!".to_string(),
            TaskStatus::Error => GENERIC_FAILURE.to_string(),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Converting => "converting",
            TaskStatus::Transcribing => "transcribing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Fallback failure text when an `error` event carries no message.
pub const GENERIC_FAILURE: &str = "An error occurred while processing the video";

/// One task state transition as emitted on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}

impl ProgressEvent {
    pub fn new(task_id: impl Into<String>, status: TaskStatus, progress: u8) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            progress: progress.min(100),
            message: None,
            transcription: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_transcription(mut self, transcription: impl Into<String>) -> Self {
        self.transcription = Some(transcription.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The explicit message, or the default one for the state.
    pub fn display_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| self.status.default_message(self.progress))
    }
}

/// Body of `POST /transcribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeRequest {
    pub video_url: String,
}

/// Response of the job-acceptance endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AcceptResponse {
    pub fn accepted(task_id: String) -> Self {
        Self {
            success: true,
            task_id: Some(task_id),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            task_id: None,
            error: Some(error.into()),
        }
    }
}

/// Messages a client sends over the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { task_id: String },
    Leave { task_id: String },
}

/// Messages the server pushes over the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ProgressUpdate(ProgressEvent),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        message: String,
    },
}

/// SSE event name used for progress frames.
pub const PROGRESS_EVENT: &str = "progress_update";
