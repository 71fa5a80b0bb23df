use super::*;
use crate::protocol::{ProgressEvent, TaskStatus};
use crate::schedule::processors::testing::ScriptedPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// 测试辅助函数：创建测试环境
fn setup_scheduler(pipeline: ScriptedPipeline, max_jobs: usize) -> (TaskScheduler, Arc<TaskRegistry>) {
    let registry = Arc::new(TaskRegistry::new(32));
    let scheduler = TaskScheduler::new(registry.clone(), Arc::new(pipeline), max_jobs);
    (scheduler, registry)
}

fn transcription_steps() -> Vec<TaskUpdate> {
    vec![
        TaskUpdate::new(TaskStatus::Downloading, 10),
        TaskUpdate::new(TaskStatus::Downloading, 30),
        TaskUpdate::new(TaskStatus::Converting, 40),
        TaskUpdate::new(TaskStatus::Transcribing, 70),
    ]
}

async fn collect_until_terminal(sub: Subscription) -> Vec<ProgressEvent> {
    let mut events = vec![sub.snapshot];
    let mut receiver = sub.receiver;
    while !events.last().map(|e| e.is_terminal()).unwrap_or(false) {
        match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Ok(event)) => events.push(event),
            other => panic!("event stream ended early: {:?}", other),
        }
    }
    events
}

#[tokio::test]
async fn test_complete_task_lifecycle() {
    let pipeline = ScriptedPipeline::succeeding(transcription_steps(), "hello world");
    let (scheduler, registry) = setup_scheduler(pipeline, 2);

    let task = scheduler.accept("https://example.com/video.mp4").await;
    assert_eq!(task.status, TaskStatus::Queued);

    let sub = registry.subscribe(&task.id).await.unwrap();
    let events = collect_until_terminal(sub).await;
    let trail: Vec<_> = events.iter().map(|e| (e.status, e.progress)).collect();
    assert_eq!(
        trail,
        vec![
            (TaskStatus::Queued, 0),
            (TaskStatus::Downloading, 10),
            (TaskStatus::Downloading, 30),
            (TaskStatus::Converting, 40),
            (TaskStatus::Transcribing, 70),
            (TaskStatus::Completed, 100),
        ]
    );
    assert!(events.iter().all(|e| e.task_id == task.id));
    assert_eq!(events.last().unwrap().transcription.as_deref(), Some("hello world"));

    let stored = registry.get_task(&task.id).await.unwrap();
    assert_eq!(stored.result.as_deref(), Some("hello world"));
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_pipeline_error_fails_task() {
    let steps = vec![TaskUpdate::new(TaskStatus::Transcribing, 80)];
    let pipeline = ScriptedPipeline::failing(steps, "upstream timeout");
    let (scheduler, registry) = setup_scheduler(pipeline, 1);

    let task = scheduler.accept("https://example.com/video.mp4").await;
    let events = collect_until_terminal(registry.subscribe(&task.id).await.unwrap()).await;

    let last = events.last().unwrap();
    assert_eq!(last.status, TaskStatus::Error);
    assert_eq!(last.progress, 80);
    assert_eq!(last.message.as_deref(), Some("upstream timeout"));
    assert!(last.transcription.is_none());
}

#[tokio::test]
async fn test_job_timeout() {
    let pipeline = ScriptedPipeline::succeeding(transcription_steps(), "too late")
        .with_step_delay(Duration::from_millis(200));
    let (scheduler, registry) = setup_scheduler(pipeline, 1);
    let scheduler = scheduler.with_job_timeout(Some(Duration::from_millis(300)));

    let task = scheduler.accept("https://example.com/video.mp4").await;
    let events = collect_until_terminal(registry.subscribe(&task.id).await.unwrap()).await;

    let last = events.last().unwrap();
    assert_eq!(last.status, TaskStatus::Error);
    assert!(last.message.as_deref().unwrap().starts_with("Job timed out"));
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let pipeline = ScriptedPipeline::succeeding(transcription_steps(), "done")
        .with_step_delay(Duration::from_millis(50));
    let (scheduler, registry) = setup_scheduler(pipeline, 1);

    let first = scheduler.accept("https://example.com/a.mp4").await;
    let second = scheduler.accept("https://example.com/b.mp4").await;
    sleep(Duration::from_millis(120)).await;

    // the second job waits for the only permit
    assert_ne!(registry.snapshot(&first.id).await.unwrap().status, TaskStatus::Queued);
    assert_eq!(registry.snapshot(&second.id).await.unwrap().status, TaskStatus::Queued);

    let events = collect_until_terminal(registry.subscribe(&second.id).await.unwrap()).await;
    assert_eq!(events.last().unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_aborts_running_jobs() {
    let pipeline = ScriptedPipeline::succeeding(transcription_steps(), "done")
        .with_step_delay(Duration::from_secs(5));
    let (scheduler, registry) = setup_scheduler(pipeline, 1);

    let task = scheduler.accept("https://example.com/video.mp4").await;
    assert_eq!(scheduler.running_jobs(), 1);
    scheduler.shutdown();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(scheduler.running_jobs(), 0);
    assert_eq!(registry.snapshot(&task.id).await.unwrap().status, TaskStatus::Queued);
}
