use std::time::Duration;

use tracing::{info, warn};

use super::channel::ProgressChannel;
use super::error::SubmitError;
use super::session::ClientSession;
use crate::protocol::{AcceptResponse, TranscribeRequest};

/// Server-issued handle of an accepted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
}

/// Turns a user submission into a task plus a live subscription.
pub struct SubmissionController {
    http: reqwest::Client,
    accept_url: reqwest::Url,
}

impl SubmissionController {
    pub fn new(server_url: &reqwest::Url) -> Result<Self, SubmitError> {
        let accept_url = server_url
            .join("transcribe")
            .map_err(|e| SubmitError::Rejected(format!("invalid server url: {}", e)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, accept_url })
    }

    /// Rejections and transport errors are reported on the session before
    /// they are returned; the session is never left in `submitting`.
    pub async fn submit(
        &self,
        session: &mut ClientSession,
        channel: &mut dyn ProgressChannel,
        input: &str,
    ) -> Result<TaskHandle, SubmitError> {
        session.begin_submission()?;
        // at most one live channel per session
        channel.close().await;

        let task_id = match self.request_task(input).await {
            Ok(task_id) => task_id,
            Err(e) => {
                session.submission_rejected(e.to_string());
                return Err(e);
            }
        };

        session.attach(task_id.clone())?;
        if let Err(e) = channel.subscribe(&task_id).await {
            warn!(task_id = %task_id, "Failed to open progress channel: {}", e);
            session.transport_failed(e.to_string());
            channel.close().await;
            return Err(e.into());
        }

        Ok(TaskHandle { task_id })
    }

    async fn request_task(&self, input: &str) -> Result<String, SubmitError> {
        info!("Submitting {:?} to {}", input, self.accept_url);
        let response = self
            .http
            .post(self.accept_url.clone())
            .json(&TranscribeRequest {
                video_url: input.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.json::<AcceptResponse>().await.ok();

        match body {
            Some(AcceptResponse {
                success: true,
                task_id: Some(task_id),
                ..
            }) if status.is_success() && !task_id.is_empty() => {
                info!(task_id = %task_id, "Job accepted");
                Ok(task_id)
            }
            Some(AcceptResponse { error: Some(error), .. }) => Err(SubmitError::Rejected(error)),
            _ => Err(SubmitError::Rejected(format!(
                "Failed to process video (server answered {})",
                status
            ))),
        }
    }
}
