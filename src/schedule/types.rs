use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{ProgressEvent, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    // media locator submitted by the user
    pub source: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: String, source: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            status: TaskStatus::Queued,
            progress: 0,
            message: None,
            result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Projection of the task onto the wire format.
    pub fn to_event(&self) -> ProgressEvent {
        let mut event = ProgressEvent::new(self.id.clone(), self.status, self.progress);
        event.message = match self.status {
            TaskStatus::Error => self.failure_reason.clone().or_else(|| self.message.clone()),
            _ => self.message.clone(),
        };
        if self.status == TaskStatus::Completed {
            event.transcription = self.result.clone();
        }
        event
    }
}

/// A stage update requested by a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
}

impl TaskUpdate {
    pub fn new(status: TaskStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    pub completed: u64,
    pub failed: u64,
}
