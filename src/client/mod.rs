//! Client side of the progress sync protocol.
//!
//! [`TranscriptionClient`] wires the pieces together: a [`ClientSession`]
//! holding the active task, a [`SubmissionController`] that asks the server
//! for a task id, and one [`ProgressChannel`] that streams its events.

pub mod channel;
pub mod error;
pub mod session;
pub mod submit;
pub mod tracker;


use tokio::sync::watch;

use crate::config::ClientConfig;

pub use channel::{open_channel, ChannelSignal, ProgressChannel, Transport};
pub use error::{ChannelError, SessionError, SubmitError};
pub use session::{ClientSession, Outcome, SessionState, SessionView};
pub use submit::{SubmissionController, TaskHandle};
pub use tracker::ReconnectPolicy;

pub struct TranscriptionClient {
    session: ClientSession,
    channel: Box<dyn ProgressChannel>,
    controller: SubmissionController,
    policy: ReconnectPolicy,
}

impl TranscriptionClient {
    pub fn new(config: &ClientConfig) -> Result<Self, SubmitError> {
        let channel = open_channel(config.transport, &config.server_url)?;
        Self::with_channel(config, channel)
    }

    /// Uses a caller-provided channel instead of the configured transport.
    pub fn with_channel(
        config: &ClientConfig,
        channel: Box<dyn ProgressChannel>,
    ) -> Result<Self, SubmitError> {
        Ok(Self {
            session: ClientSession::new(),
            channel,
            controller: SubmissionController::new(&config.server_url)?,
            policy: config.reconnect.clone(),
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.session.subscribe()
    }

    pub fn subscribed_task(&self) -> Option<&str> {
        self.channel.subscribed_task()
    }

    pub async fn submit(&mut self, input: &str) -> Result<TaskHandle, SubmitError> {
        self.controller
            .submit(&mut self.session, self.channel.as_mut(), input)
            .await
    }

    /// Follows the submitted task to its end, resuming after disconnects.
    pub async fn wait(&mut self) -> Result<Outcome, SessionError> {
        tracker::track(&mut self.session, self.channel.as_mut(), &self.policy).await
    }

    /// Submit and wait in one go.
    pub async fn transcribe(&mut self, input: &str) -> Result<Outcome, SubmitError> {
        self.submit(input).await?;
        Ok(self.wait().await?)
    }

    pub fn dismiss(&mut self) -> Result<(), SessionError> {
        self.session.dismiss()
    }

    /// Stops following the current task; the job keeps running server side.
    pub async fn abandon(&mut self) {
        self.channel.close().await;
        self.session.abandon();
    }

    pub async fn close(mut self) {
        self.abandon().await;
    }
}
