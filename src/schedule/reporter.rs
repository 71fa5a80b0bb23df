use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::TaskStatus;
use crate::schedule::registry::TaskRegistry;
use crate::schedule::types::TaskUpdate;

/// Where a running pipeline reports its stage progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: TaskUpdate) -> Result<()>;

    async fn stage(&self, status: TaskStatus, progress: u8) -> Result<()> {
        self.report(TaskUpdate::new(status, progress)).await
    }
}

// 通过任务注册表发布进度
#[derive(Clone)]
pub struct RegistryReporter {
    task_id: String,
    registry: Arc<TaskRegistry>,
}

impl RegistryReporter {
    pub fn new(task_id: String, registry: Arc<TaskRegistry>) -> Self {
        Self { task_id, registry }
    }
}

#[async_trait]
impl ProgressSink for RegistryReporter {
    async fn report(&self, update: TaskUpdate) -> Result<()> {
        self.registry.advance(&self.task_id, update).await?;
        Ok(())
    }
}
