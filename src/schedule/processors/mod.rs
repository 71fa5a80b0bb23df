pub mod media;

use anyhow::Result;
use async_trait::async_trait;

use crate::schedule::reporter::ProgressSink;

pub use media::MediaPipeline;

/// Turns a media locator into a transcription, reporting stage progress
/// along the way. Terminal transitions belong to the scheduler.
#[async_trait]
pub trait JobPipeline: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, source: &str, sink: &dyn ProgressSink) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::time::Duration;

    use crate::schedule::types::TaskUpdate;

    /// Replays fixed stage updates, then succeeds or fails.
    pub struct ScriptedPipeline {
        pub steps: Vec<TaskUpdate>,
        pub outcome: std::result::Result<String, String>,
        pub step_delay: Duration,
    }

    impl ScriptedPipeline {
        pub fn succeeding(steps: Vec<TaskUpdate>, text: &str) -> Self {
            Self {
                steps,
                outcome: Ok(text.to_string()),
                step_delay: Duration::from_millis(50),
            }
        }

        pub fn failing(steps: Vec<TaskUpdate>, reason: &str) -> Self {
            Self {
                steps,
                outcome: Err(reason.to_string()),
                step_delay: Duration::from_millis(50),
            }
        }

        pub fn with_step_delay(mut self, delay: Duration) -> Self {
            self.step_delay = delay;
            self
        }
    }

    #[async_trait]
    impl JobPipeline for ScriptedPipeline {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, _source: &str, sink: &dyn ProgressSink) -> Result<String> {
            for step in &self.steps {
                tokio::time::sleep(self.step_delay).await;
                sink.report(step.clone()).await?;
            }
            tokio::time::sleep(self.step_delay).await;
            self.outcome.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }
}
