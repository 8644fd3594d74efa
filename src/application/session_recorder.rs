use crate::application::workspace::UserWorkspace;
use crate::domain::models::{Id, Notification, Session, Task};
use crate::infrastructure::error::InfraError;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// No task was selected; nothing was stored.
    NoTask,
    Remote(Session),
    /// Stored on this device only, waiting for the next sync.
    Local(Session),
}

pub struct SessionRecorder {
    workspace: Arc<UserWorkspace>,
}

impl SessionRecorder {
    pub fn new(workspace: Arc<UserWorkspace>) -> Self {
        Self { workspace }
    }

    /// Records one completed focus period against `task_id` and bumps the
    /// task's pomodoro counter exactly once.
    pub async fn complete_focus_session(
        &self,
        task_id: Option<&Id>,
        duration_minutes: u32,
    ) -> Result<RecordOutcome, InfraError> {
        if duration_minutes == 0 {
            return Err(InfraError::Validation(
                "session.duration must be > 0".to_string(),
            ));
        }
        let Some(task_id) = task_id else {
            self.workspace.notify(Notification::info(
                "Session complete",
                "Select a task to track your pomodoros.",
            ));
            return Ok(RecordOutcome::NoTask);
        };

        let task = self.find_task(task_id).await?;
        let remote_task_id = match &task.id {
            Id::Remote(value) => Some(value.clone()),
            Id::Local(_) => None,
        };

        let Some(remote_task_id) = remote_task_id else {
            let session = Session::new_local(&task, duration_minutes, self.workspace.now());
            self.apply(session.clone(), None).await;
            return Ok(RecordOutcome::Local(session));
        };

        let recorded = self
            .workspace
            .session_repository()
            .record(&remote_task_id, &task.title, duration_minutes)
            .await;
        match recorded {
            Ok(session) => {
                let pomodoros = self.refetch_pomodoros(&remote_task_id).await;
                self.apply(session.clone(), pomodoros).await;
                Ok(RecordOutcome::Remote(session))
            }
            Err(error) => {
                warn!(
                    user_id = %self.workspace.user_id(),
                    task_id = %task.id,
                    %error,
                    "failed to record session remotely, keeping it on this device"
                );
                self.workspace.notify(Notification::warning(
                    "Saved offline",
                    "The session was saved on this device and will sync later.",
                ));
                let session = Session::new_local(&task, duration_minutes, self.workspace.now());
                self.apply(session.clone(), None).await;
                Ok(RecordOutcome::Local(session))
            }
        }
    }

    async fn find_task(&self, task_id: &Id) -> Result<Task, InfraError> {
        let data = self.workspace.lock().await;
        match data.task(task_id) {
            Some(task) => Ok(task.clone()),
            None => {
                warn!(
                    user_id = %self.workspace.user_id(),
                    task_id = %task_id,
                    "completed focus session for unknown task"
                );
                Err(InfraError::NotFound(format!("task {task_id}")))
            }
        }
    }

    async fn refetch_pomodoros(&self, remote_task_id: &str) -> Option<u32> {
        match self.workspace.task_repository().fetch(remote_task_id).await {
            Ok(Some(task)) => Some(task.pomodoros),
            Ok(None) => None,
            Err(error) => {
                warn!(
                    user_id = %self.workspace.user_id(),
                    task_id = remote_task_id,
                    %error,
                    "failed to refetch task after recording session"
                );
                None
            }
        }
    }

    /// `pomodoros` is the server count when known. The server has not seen
    /// this task's local sessions or unpushed completions yet, so they are
    /// added on top. Without a
    /// server count the local copy is incremented by one.
    async fn apply(&self, session: Session, pomodoros: Option<u32>) {
        let mut data = self.workspace.lock().await;
        let unseen = data.unseen_pomodoros(&session.task_id);
        if let Some(task) = data.task_mut(&session.task_id) {
            task.pomodoros = match pomodoros {
                Some(count) => count.saturating_add(unseen),
                None => task.pomodoros.saturating_add(1),
            };
        }
        info!(
            user_id = %self.workspace.user_id(),
            session_id = %session.id,
            task_id = %session.task_id,
            duration = session.duration,
            "focus session recorded"
        );
        data.sessions.push(session);
        self.workspace.persist_tasks(&data);
        self.workspace.persist_sessions(&data);
    }
}
