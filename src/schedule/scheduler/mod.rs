mod worker;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::schedule::processors::JobPipeline;
use crate::schedule::registry::TaskRegistry;
use crate::schedule::types::Task;
use worker::TaskWorker;

/// Accepts jobs and runs each one on its own tokio task, at most
/// `max_concurrent` at a time.
pub struct TaskScheduler {
    registry: Arc<TaskRegistry>,
    pipeline: Arc<dyn JobPipeline>,
    permits: Arc<Semaphore>,
    job_timeout: Option<Duration>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        pipeline: Arc<dyn JobPipeline>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            job_timeout: None,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Creates the task and queues its job. Returns as soon as the id
    /// exists, the job runs in the background.
    pub async fn accept(&self, source: &str) -> Task {
        let task = self.registry.create_task(source).await;
        let worker = TaskWorker::new(
            self.registry.clone(),
            self.pipeline.clone(),
            task.id.clone(),
            task.source.clone(),
        )
        .with_timeout(self.job_timeout);

        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(permit) => worker.run(permit).await,
                Err(e) => error!("Scheduler closed before the job started: {}", e),
            }
        });

        if let Ok(mut workers) = self.workers.lock() {
            workers.retain(|h| !h.is_finished());
            workers.push(handle);
        }
        task
    }

    /// Periodically drops finished tasks older than `retention`.
    pub fn spawn_cleanup(&self, interval: Duration, retention: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.purge_expired(retention).await;
            }
        })
    }

    pub fn running_jobs(&self) -> usize {
        self.workers
            .lock()
            .map(|workers| workers.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Aborts every job that has not finished yet.
    pub fn shutdown(&self) {
        self.permits.close();
        if let Ok(mut workers) = self.workers.lock() {
            info!(jobs = workers.len(), "Stopping scheduler");
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        info!("TaskScheduler is being dropped, cleaning up resources...");
    }
}
