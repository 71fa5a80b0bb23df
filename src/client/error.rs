use thiserror::Error;

use super::session::SessionState;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server does not know the task (never existed or already purged).
    #[error("task {0} is no longer available")]
    Unavailable(String),
    #[error("failed to send subscription: {0}")]
    Send(String),
    #[error("invalid channel address: {0}")]
    Address(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a submission is already in progress ({0:?})")]
    Busy(SessionState),
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Rejected by the job-acceptance endpoint; the text is shown as is.
    #[error("{0}")]
    Rejected(String),
    #[error("job acceptance request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
