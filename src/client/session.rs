//! Client-side task projection and its state machine.
//!
//! ```text
//! idle ──submit──▶ submitting ──accepted──▶ tracking ──completed──▶ completed
//!   ▲                  │                       │     ──error─────▶ failed
//!   └───rejected───────┘                       └─transport lost──▶ failed
//! completed | failed ──dismiss──▶ idle
//! ```
//!
//! The session is the only owner of the active task id. Renderers follow
//! [`SessionView`] snapshots through a `watch` channel instead of being
//! poked from transport callbacks.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::SessionError;
use crate::protocol::{ProgressEvent, TaskStatus, GENERIC_FAILURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitting,
    Tracking,
    Completed,
    Failed,
}

impl SessionState {
    pub fn can_submit(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Completed | SessionState::Failed
        )
    }
}

/// What the UI knows about the active task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskProjection {
    pub task_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<String>,
    pub failure_reason: Option<String>,
}

/// Everything a renderer needs, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub task: TaskProjection,
    /// The single user-visible alert: rejections, transport trouble and
    /// task failures all land here.
    pub notice: Option<String>,
}

impl SessionView {
    pub fn can_submit(&self) -> bool {
        self.state.can_submit()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NotTracking,
    ForeignTask,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Terminal,
    Discarded(DiscardReason),
}

/// Final result of tracking one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        task_id: String,
        transcription: String,
    },
    Failed {
        task_id: Option<String>,
        reason: String,
    },
}

pub struct ClientSession {
    state: SessionState,
    active_task: Option<String>,
    projection: TaskProjection,
    notice: Option<String>,
    view_tx: watch::Sender<SessionView>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        let (view_tx, _) = watch::channel(SessionView {
            state: SessionState::Idle,
            task: TaskProjection::default(),
            notice: None,
        });
        Self {
            state: SessionState::Idle,
            active_task: None,
            projection: TaskProjection::default(),
            notice: None,
            view_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_task(&self) -> Option<&str> {
        self.active_task.as_deref()
    }

    pub fn can_submit(&self) -> bool {
        self.state.can_submit()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            task: self.projection.clone(),
            notice: self.notice.clone(),
        }
    }

    /// Receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    /// Locks submission and clears whatever the previous task rendered.
    pub fn begin_submission(&mut self) -> Result<(), SessionError> {
        if !self.can_submit() {
            return Err(SessionError::Busy(self.state));
        }
        self.state = SessionState::Submitting;
        self.active_task = None;
        self.projection = TaskProjection::default();
        self.notice = None;
        self.publish();
        Ok(())
    }

    /// Job acceptance failed; back to idle with the reason on display.
    pub fn submission_rejected(&mut self, reason: String) {
        if self.state != SessionState::Submitting {
            warn!(state = ?self.state, "Ignoring rejection outside of a submission");
            return;
        }
        info!("Submission rejected: {}", reason);
        self.state = SessionState::Idle;
        self.notice = Some(reason);
        self.publish();
    }

    /// Binds the server-issued task id. Only valid once per submission.
    pub fn attach(&mut self, task_id: String) -> Result<(), SessionError> {
        if self.state != SessionState::Submitting || self.active_task.is_some() {
            return Err(SessionError::InvalidTransition {
                action: "attach a task",
                state: self.state,
            });
        }
        info!(task_id = %task_id, "Tracking task");
        self.projection = TaskProjection {
            task_id: Some(task_id.clone()),
            status: Some(TaskStatus::Queued),
            progress: 0,
            message: Some(TaskStatus::Queued.default_message(0)),
            result: None,
            failure_reason: None,
        };
        self.active_task = Some(task_id);
        self.state = SessionState::Tracking;
        self.publish();
        Ok(())
    }

    /// Folds one stream event into the projection, or discards it.
    pub fn apply(&mut self, event: &ProgressEvent) -> Applied {
        if self.state != SessionState::Tracking {
            debug!(task_id = %event.task_id, state = ?self.state, "Discarding event outside of tracking");
            return Applied::Discarded(DiscardReason::NotTracking);
        }
        if self.active_task.as_deref() != Some(event.task_id.as_str()) {
            debug!(task_id = %event.task_id, active = ?self.active_task, "Discarding event for another task");
            return Applied::Discarded(DiscardReason::ForeignTask);
        }
        if let Some(current) = self.projection.status {
            if !current.can_advance_to(event.status) {
                debug!(from = %current, to = %event.status, "Discarding out-of-order event");
                return Applied::Discarded(DiscardReason::OutOfOrder);
            }
        }

        self.projection.status = Some(event.status);
        self.projection.progress = event.progress.min(100);
        self.projection.message = Some(event.display_message());
        self.notice = None;

        let applied = match event.status {
            TaskStatus::Completed => {
                self.projection.result = Some(event.transcription.clone().unwrap_or_default());
                self.state = SessionState::Completed;
                info!(task_id = %event.task_id, "Task completed");
                Applied::Terminal
            }
            TaskStatus::Error => {
                let reason = event
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.projection.failure_reason = Some(reason.clone());
                self.notice = Some(reason);
                self.state = SessionState::Failed;
                info!(task_id = %event.task_id, "Task failed");
                Applied::Terminal
            }
            _ => Applied::Updated,
        };
        self.publish();
        applied
    }

    /// Transport dropped while tracking. Returns the id to resume, if any.
    pub fn connection_lost(&mut self, reason: &str) -> Option<String> {
        if self.state != SessionState::Tracking {
            return None;
        }
        warn!(task_id = ?self.active_task, "Connection lost: {}", reason);
        self.notice = Some("Connection lost, reconnecting...".to_string());
        self.publish();
        self.active_task.clone()
    }

    /// Task to re-subscribe after a disconnect. `None` unless tracking.
    pub fn resume_target(&self) -> Option<&str> {
        match self.state {
            SessionState::Tracking => self.active_task.as_deref(),
            _ => None,
        }
    }

    pub fn reconnected(&mut self) {
        if self.state == SessionState::Tracking && self.notice.is_some() {
            self.notice = None;
            self.publish();
        }
    }

    /// Unrecoverable transport error. Terminal states are left untouched.
    pub fn transport_failed(&mut self, reason: String) {
        if matches!(self.state, SessionState::Completed | SessionState::Failed) {
            return;
        }
        warn!(task_id = ?self.active_task, "Transport failed: {}", reason);
        self.projection.failure_reason = Some(reason.clone());
        self.notice = Some(reason);
        self.state = SessionState::Failed;
        self.publish();
    }

    /// Leaves the terminal display and frees the session.
    pub fn dismiss(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Completed | SessionState::Failed) {
            return Err(SessionError::InvalidTransition {
                action: "dismiss",
                state: self.state,
            });
        }
        self.reset();
        Ok(())
    }

    /// Drops whatever is going on (navigation away).
    pub fn abandon(&mut self) {
        if self.state != SessionState::Idle {
            info!(task_id = ?self.active_task, "Abandoning session");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.active_task = None;
        self.projection = TaskProjection::default();
        self.notice = None;
        self.publish();
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            SessionState::Completed => Some(Outcome::Completed {
                task_id: self.active_task.clone().unwrap_or_default(),
                transcription: self.projection.result.clone().unwrap_or_default(),
            }),
            SessionState::Failed => Some(Outcome::Failed {
                task_id: self.active_task.clone(),
                reason: self
                    .projection
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking(task_id: &str) -> ClientSession {
        let mut session = ClientSession::new();
        session.begin_submission().unwrap();
        session.attach(task_id.to_string()).unwrap();
        session
    }

    fn event(task_id: &str, status: TaskStatus, progress: u8) -> ProgressEvent {
        ProgressEvent::new(task_id, status, progress)
    }

    #[test]
    fn test_rendered_state_follows_last_applied_event() {
        let mut session = tracking("t1");
        let sequence = [
            event("t1", TaskStatus::Downloading, 10),
            event("t1", TaskStatus::Downloading, 30),
            event("t1", TaskStatus::Converting, 40),
            event("t1", TaskStatus::Transcribing, 70).with_message("Almost there"),
        ];
        for e in &sequence {
            assert_eq!(session.apply(e), Applied::Updated);
            let view = session.view();
            assert_eq!(view.task.status, Some(e.status));
            assert_eq!(view.task.progress, e.progress);
            assert_eq!(view.task.message, Some(e.display_message()));
        }
        assert_eq!(session.view().task.message.as_deref(), Some("Almost there"));
        assert!(!session.can_submit());

        let done = event("t1", TaskStatus::Completed, 100).with_transcription("hello world");
        assert_eq!(session.apply(&done), Applied::Terminal);
        assert_eq!(session.state(), SessionState::Completed);
        assert!(session.can_submit());
        assert_eq!(session.view().task.result.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_foreign_task_events_do_not_mutate() {
        let mut session = tracking("t3");
        session.apply(&event("t3", TaskStatus::Downloading, 20));
        let before = session.view();

        let stale = event("t4", TaskStatus::Completed, 100).with_transcription("wrong");
        assert_eq!(session.apply(&stale), Applied::Discarded(DiscardReason::ForeignTask));
        assert_eq!(session.view(), before);
        assert_eq!(session.state(), SessionState::Tracking);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut session = tracking("t1");
        session.apply(&event("t1", TaskStatus::Error, 40).with_message("boom"));
        let after_terminal = session.view();

        for late in [
            event("t1", TaskStatus::Transcribing, 90),
            event("t1", TaskStatus::Completed, 100).with_transcription("late"),
        ] {
            assert_eq!(session.apply(&late), Applied::Discarded(DiscardReason::NotTracking));
        }
        assert_eq!(session.view(), after_terminal);
        assert_eq!(session.view().notice.as_deref(), Some("boom"));
    }

    #[test]
    fn test_backward_transition_is_discarded() {
        let mut session = tracking("t1");
        session.apply(&event("t1", TaskStatus::Transcribing, 60));
        assert_eq!(
            session.apply(&event("t1", TaskStatus::Downloading, 90)),
            Applied::Discarded(DiscardReason::OutOfOrder)
        );
        assert_eq!(session.view().task.status, Some(TaskStatus::Transcribing));

        // replayed snapshot of the same state is fine
        assert_eq!(session.apply(&event("t1", TaskStatus::Transcribing, 60)), Applied::Updated);
    }

    #[test]
    fn test_error_without_message_uses_fallback() {
        let mut session = tracking("t1");
        session.apply(&event("t1", TaskStatus::Error, 0));
        assert_eq!(session.view().task.failure_reason.as_deref(), Some(GENERIC_FAILURE));
        assert_eq!(
            session.outcome(),
            Some(Outcome::Failed {
                task_id: Some("t1".into()),
                reason: GENERIC_FAILURE.into()
            })
        );
    }

    #[test]
    fn test_submission_guard_and_rejection() {
        let mut session = ClientSession::new();
        session.begin_submission().unwrap();
        assert_eq!(
            session.begin_submission(),
            Err(SessionError::Busy(SessionState::Submitting))
        );

        session.submission_rejected("invalid url".into());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.view().notice.as_deref(), Some("invalid url"));
        assert!(session.active_task().is_none());
        assert!(session.can_submit());

        // the next submission clears the old notice
        session.begin_submission().unwrap();
        assert!(session.view().notice.is_none());
    }

    #[test]
    fn test_attach_only_once() {
        let mut session = tracking("t1");
        assert!(session.attach("t2".into()).is_err());
        assert_eq!(session.active_task(), Some("t1"));

        let mut idle = ClientSession::new();
        assert!(idle.attach("t1".into()).is_err());
    }

    #[test]
    fn test_resume_target_only_while_tracking() {
        let mut idle = ClientSession::new();
        assert!(idle.resume_target().is_none());
        assert!(idle.connection_lost("reset").is_none());

        let mut session = tracking("t2");
        assert_eq!(session.connection_lost("reset"), Some("t2".to_string()));
        assert!(session.view().notice.is_some());
        assert_eq!(session.state(), SessionState::Tracking);
        session.reconnected();
        assert!(session.view().notice.is_none());

        session.apply(&event("t2", TaskStatus::Completed, 100));
        assert!(session.resume_target().is_none());
    }

    #[test]
    fn test_transport_failure_does_not_override_terminal() {
        let mut session = tracking("t1");
        session.apply(&event("t1", TaskStatus::Completed, 100).with_transcription("ok"));
        session.transport_failed("socket closed".into());
        assert_eq!(session.state(), SessionState::Completed);

        let mut session = tracking("t2");
        session.transport_failed("socket closed".into());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.can_submit());
        assert_eq!(session.view().notice.as_deref(), Some("socket closed"));
    }

    #[test]
    fn test_dismiss_returns_to_idle() {
        let mut session = tracking("t1");
        assert!(session.dismiss().is_err());
        session.apply(&event("t1", TaskStatus::Completed, 100));
        session.dismiss().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.active_task().is_none());
        assert_eq!(session.view().task, TaskProjection::default());
    }

    #[tokio::test]
    async fn test_watchers_see_each_change() {
        let mut session = ClientSession::new();
        let mut rx = session.subscribe();

        session.begin_submission().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, SessionState::Submitting);

        session.attach("t1".into()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().task.task_id.as_deref(), Some("t1"));
    }
}
