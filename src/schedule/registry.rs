use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ProgressEvent, TaskStatus};
use crate::schedule::types::{CleanupStats, Task, TaskStats, TaskUpdate};

/// Owns the task id space and fans state transitions out to subscribers.
///
/// Each task has its own broadcast sender. Publishing happens under the
/// write lock and [`TaskRegistry::subscribe`] takes the read lock, so a new
/// subscriber sees every event after its snapshot exactly once.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    event_buffer: usize,
}

struct TaskEntry {
    task: Task,
    sender: broadcast::Sender<ProgressEvent>,
}

/// Latest state of a task plus a receiver for everything that follows it.
pub struct Subscription {
    pub snapshot: ProgressEvent,
    pub receiver: broadcast::Receiver<ProgressEvent>,
}

impl TaskRegistry {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            event_buffer: event_buffer.max(1),
        }
    }

    pub async fn create_task(&self, source: &str) -> Task {
        let task = Task::new(format!("task-{}", Uuid::new_v4()), source.to_string());
        let (sender, _) = broadcast::channel(self.event_buffer);

        self.tasks.write().await.insert(
            task.id.clone(),
            TaskEntry {
                task: task.clone(),
                sender,
            },
        );
        info!(task_id = %task.id, source = %task.source, "Creating new task");
        task
    }

    /// Moves a task to a non-terminal stage.
    pub async fn advance(&self, task_id: &str, update: TaskUpdate) -> Result<ProgressEvent> {
        if update.status.is_terminal() {
            anyhow::bail!("Terminal status {} must go through complete or fail", update.status);
        }
        self.apply(task_id, update, None).await
    }

    pub async fn complete(&self, task_id: &str, transcription: String) -> Result<ProgressEvent> {
        let update = TaskUpdate::new(TaskStatus::Completed, 100)
            .with_message("Transcription completed successfully!");
        self.apply(task_id, update, Some(transcription)).await
    }

    /// Fails a task at its current progress.
    pub async fn fail(&self, task_id: &str, reason: String) -> Result<ProgressEvent> {
        let progress = self
            .tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.progress)
            .unwrap_or(0);
        let update = TaskUpdate::new(TaskStatus::Error, progress).with_message(reason);
        self.apply(task_id, update, None).await
    }

    async fn apply(
        &self,
        task_id: &str,
        update: TaskUpdate,
        transcription: Option<String>,
    ) -> Result<ProgressEvent> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| anyhow::anyhow!("Task not found: {}", task_id))?;

        let task = &mut entry.task;
        if !task.status.can_advance_to(update.status) {
            anyhow::bail!(
                "Invalid transition for task {}: {} -> {}",
                task_id,
                task.status,
                update.status
            );
        }

        let mut progress = update.progress.min(100);
        if update.status == task.status && progress < task.progress {
            warn!(
                task_id,
                status = %task.status,
                current = task.progress,
                requested = progress,
                "Ignoring progress regression"
            );
            progress = task.progress;
        }

        let now = Utc::now();
        task.status = update.status;
        task.progress = progress;
        task.updated_at = now;
        match update.status {
            TaskStatus::Completed => {
                task.message = update.message;
                task.result = transcription;
                task.completed_at = Some(now);
            }
            TaskStatus::Error => {
                task.message = None;
                task.failure_reason = update.message;
                task.completed_at = Some(now);
            }
            _ => task.message = update.message,
        }

        let event = task.to_event();
        info!(task_id, status = %event.status, progress = event.progress, "Updating task progress");

        // nobody listening is fine, late joiners get the snapshot
        if entry.sender.send(event.clone()).is_err() {
            debug!(task_id, "No subscribers for progress update");
        }
        Ok(event)
    }

    /// Snapshot and live receiver, taken atomically.
    pub async fn subscribe(&self, task_id: &str) -> Option<Subscription> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).map(|entry| Subscription {
            snapshot: entry.task.to_event(),
            receiver: entry.sender.subscribe(),
        })
    }

    pub async fn snapshot(&self, task_id: &str) -> Option<ProgressEvent> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.to_event())
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.clone())
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read().await;
        let mut stats = TaskStats::default();
        for entry in tasks.values() {
            match entry.task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Error => stats.failed += 1,
                _ => stats.running += 1,
            }
        }
        stats
    }

    /// Drops terminal tasks that finished more than `retention` ago.
    pub async fn purge_expired(&self, retention: chrono::Duration) -> CleanupStats {
        let cutoff = Utc::now() - retention;
        let mut stats = CleanupStats::default();
        let mut tasks = self.tasks.write().await;

        tasks.retain(|task_id, entry| {
            let expired = entry
                .task
                .completed_at
                .map(|at| at < cutoff)
                .unwrap_or(false);
            if expired {
                debug!(task_id = %task_id, "Purging finished task");
                match entry.task.status {
                    TaskStatus::Completed => stats.completed += 1,
                    _ => stats.failed += 1,
                }
            }
            !expired
        });

        if stats.completed + stats.failed > 0 {
            info!(completed = stats.completed, failed = stats.failed, "Purged finished tasks");
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_ids_are_server_issued_and_unique() {
        let registry = TaskRegistry::new(8);
        let a = registry.create_task("https://example.com/a.mp4").await;
        let b = registry.create_task("https://example.com/a.mp4").await;

        assert!(a.id.starts_with("task-"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_subscriber_receives_ordered_events() {
        let registry = TaskRegistry::new(8);
        let task = registry.create_task("https://example.com/video.mp4").await;
        let mut sub = registry.subscribe(&task.id).await.unwrap();
        assert_eq!(sub.snapshot.status, TaskStatus::Queued);

        registry.advance(&task.id, TaskUpdate::new(TaskStatus::Downloading, 10)).await.unwrap();
        registry.advance(&task.id, TaskUpdate::new(TaskStatus::Converting, 40)).await.unwrap();
        registry.complete(&task.id, "hello world".into()).await.unwrap();

        let statuses: Vec<_> = [
            sub.receiver.recv().await.unwrap(),
            sub.receiver.recv().await.unwrap(),
            sub.receiver.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| (e.status, e.progress))
        .collect();
        assert_eq!(
            statuses,
            vec![
                (TaskStatus::Downloading, 10),
                (TaskStatus::Converting, 40),
                (TaskStatus::Completed, 100)
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_backward_and_post_terminal_transitions() {
        let registry = TaskRegistry::new(8);
        let task = registry.create_task("https://example.com/video.mp4").await;

        registry.advance(&task.id, TaskUpdate::new(TaskStatus::Transcribing, 50)).await.unwrap();
        assert!(registry
            .advance(&task.id, TaskUpdate::new(TaskStatus::Downloading, 60))
            .await
            .is_err());

        registry.fail(&task.id, "upstream timeout".into()).await.unwrap();
        assert!(registry.complete(&task.id, "late".into()).await.is_err());
        assert!(registry.fail(&task.id, "again".into()).await.is_err());

        let snapshot = registry.snapshot(&task.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.message.as_deref(), Some("upstream timeout"));
    }

    #[tokio::test]
    async fn test_progress_never_regresses_within_a_state() {
        let registry = TaskRegistry::new(8);
        let task = registry.create_task("https://example.com/video.mp4").await;

        registry.advance(&task.id, TaskUpdate::new(TaskStatus::Downloading, 30)).await.unwrap();
        let event = registry
            .advance(&task.id, TaskUpdate::new(TaskStatus::Downloading, 20))
            .await
            .unwrap();
        assert_eq!(event.progress, 30);

        // a new state may start lower
        let event = registry
            .advance(&task.id, TaskUpdate::new(TaskStatus::Converting, 0))
            .await
            .unwrap();
        assert_eq!(event.progress, 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_snapshot() {
        let registry = TaskRegistry::new(8);
        let task = registry.create_task("https://example.com/video.mp4").await;
        registry.complete(&task.id, "hello world".into()).await.unwrap();

        let sub = registry.subscribe(&task.id).await.unwrap();
        assert_eq!(sub.snapshot.status, TaskStatus::Completed);
        assert_eq!(sub.snapshot.transcription.as_deref(), Some("hello world"));
        assert!(registry.subscribe("task-unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_purge_only_drops_expired_terminal_tasks() {
        let registry = TaskRegistry::new(8);
        let done = registry.create_task("https://example.com/a.mp4").await;
        let running = registry.create_task("https://example.com/b.mp4").await;
        registry.complete(&done.id, "text".into()).await.unwrap();
        registry.advance(&running.id, TaskUpdate::new(TaskStatus::Downloading, 5)).await.unwrap();

        let kept = registry.purge_expired(chrono::Duration::hours(1)).await;
        assert_eq!(kept.completed, 0);

        let purged = registry.purge_expired(chrono::Duration::seconds(-1)).await;
        assert_eq!(purged.completed, 1);
        assert!(registry.get_task(&done.id).await.is_none());
        assert!(registry.get_task(&running.id).await.is_some());
        assert_eq!(registry.stats().await.running, 1);
    }
}
