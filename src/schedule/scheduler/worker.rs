use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, info, warn};

use crate::schedule::processors::JobPipeline;
use crate::schedule::registry::TaskRegistry;
use crate::schedule::reporter::RegistryReporter;

/// Runs one accepted job to a terminal state.
pub struct TaskWorker {
    registry: Arc<TaskRegistry>,
    pipeline: Arc<dyn JobPipeline>,
    task_id: String,
    source: String,
    // wall-clock limit for the whole job, None = unbounded
    timeout: Option<Duration>,
}

impl TaskWorker {
    pub fn new(
        registry: Arc<TaskRegistry>,
        pipeline: Arc<dyn JobPipeline>,
        task_id: String,
        source: String,
    ) -> Self {
        Self {
            registry,
            pipeline,
            task_id,
            source,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(self, _permit: OwnedSemaphorePermit) {
        info!(task_id = %self.task_id, pipeline = self.pipeline.name(), "Processing task");
        let reporter = RegistryReporter::new(self.task_id.clone(), self.registry.clone());

        let job = self.pipeline.run(&self.source, &reporter);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "Job timed out after {}s",
                    limit.as_secs()
                )),
            },
            None => job.await,
        };

        let finished = match outcome {
            Ok(transcription) => {
                info!(task_id = %self.task_id, "Task completed successfully");
                self.registry.complete(&self.task_id, transcription).await
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(task_id = %self.task_id, "Task failed: {}", reason);
                self.registry.fail(&self.task_id, reason).await
            }
        };

        if let Err(e) = finished {
            error!(task_id = %self.task_id, "Failed to finalize task: {}", e);
        }
    }
}
