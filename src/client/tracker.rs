use std::time::Duration;

use tracing::{debug, info, warn};

use super::channel::{ChannelSignal, ProgressChannel};
use super::error::{ChannelError, SessionError};
use super::session::{Applied, ClientSession, Outcome, SessionState};

/// How hard to try getting a dropped channel back.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Exponential backoff for the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Drives the channel into the session until the task is terminal or the
/// transport is gone for good. The channel is closed on return.
pub async fn track(
    session: &mut ClientSession,
    channel: &mut dyn ProgressChannel,
    policy: &ReconnectPolicy,
) -> Result<Outcome, SessionError> {
    if session.state() != SessionState::Tracking {
        return session.outcome().ok_or(SessionError::InvalidTransition {
            action: "track",
            state: session.state(),
        });
    }

    while session.state() == SessionState::Tracking {
        match channel.next_signal().await {
            ChannelSignal::Event(event) => match session.apply(&event) {
                Applied::Terminal => channel.close().await,
                Applied::Updated => {}
                Applied::Discarded(reason) => {
                    debug!(task_id = %event.task_id, ?reason, "Event discarded");
                }
            },
            ChannelSignal::ConnectionLost(reason) => {
                session.connection_lost(&reason);
                if let Err(reason) = resume(session, channel, policy).await {
                    session.transport_failed(reason);
                    channel.close().await;
                }
            }
            ChannelSignal::Rejected(reason) => {
                session.transport_failed(reason);
                channel.close().await;
            }
            ChannelSignal::Closed => {
                session.transport_failed(
                    "Progress channel closed before the task finished".to_string(),
                );
            }
        }
    }

    channel.close().await;
    session.outcome().ok_or(SessionError::InvalidTransition {
        action: "finish tracking",
        state: session.state(),
    })
}

/// Re-subscribes the channel to the session's active task.
///
/// `Ok(false)` when no task is active (nothing is subscribed), `Ok(true)`
/// once resubscribed, `Err` with a user-facing reason when giving up.
pub async fn resume(
    session: &mut ClientSession,
    channel: &mut dyn ProgressChannel,
    policy: &ReconnectPolicy,
) -> Result<bool, String> {
    let task_id = match session.resume_target() {
        Some(task_id) => task_id.to_string(),
        None => return Ok(false),
    };

    let mut last_error = String::from("reconnection disabled");
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay(attempt)).await;
        match channel.subscribe(&task_id).await {
            Ok(()) => {
                info!(task_id = %task_id, attempt, "Resubscribed after disconnect");
                session.reconnected();
                return Ok(true);
            }
            Err(ChannelError::Unavailable(_)) => {
                return Err(format!(
                    "Connection lost and task {} is no longer available",
                    task_id
                ));
            }
            Err(e) => {
                warn!(task_id = %task_id, attempt, "Reconnect failed: {}", e);
                last_error = e.to_string();
            }
        }
    }

    Err(format!("Connection lost: {}", last_error))
}
