use crate::application::workspace::UserWorkspace;
use crate::domain::models::{Id, Notification, Session, Task, TaskPatch};
use crate::infrastructure::error::InfraError;
use std::sync::Arc;
use tracing::{info, warn};

/// User-facing task operations on one workspace. Remote failures degrade to
/// local-only changes that the next sync reconciles.
#[derive(Clone)]
pub struct TaskService {
    workspace: Arc<UserWorkspace>,
}

impl TaskService {
    pub fn new(workspace: Arc<UserWorkspace>) -> Self {
        Self { workspace }
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.workspace.tasks().await
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions = self.workspace.sessions().await;
        sessions.sort_by(|left, right| right.completed_at.cmp(&left.completed_at));
        sessions
    }

    pub async fn current_task(&self) -> Option<Task> {
        self.workspace.current_task().await
    }

    pub async fn add_task(&self, title: &str, description: &str) -> Result<Task, InfraError> {
        let draft = Task::new_local(self.workspace.user_id(), title, description, self.workspace.now())
            .map_err(InfraError::Validation)?;

        let task = match self
            .workspace
            .task_repository()
            .create(&draft.title, &draft.description)
            .await
        {
            Ok(task) => task,
            Err(error) => {
                warn!(user_id = %self.workspace.user_id(), %error, "failed to create task remotely, keeping it on this device");
                self.workspace.notify(Notification::warning(
                    "Saved offline",
                    "The task was saved on this device and will sync later.",
                ));
                draft
            }
        };

        let mut data = self.workspace.lock().await;
        data.tasks.push(task.clone());
        self.workspace.persist_tasks(&data);
        info!(user_id = %self.workspace.user_id(), task_id = %task.id, "task added");
        Ok(task)
    }

    pub async fn update_task(&self, task_id: &Id, patch: TaskPatch) -> Result<Task, InfraError> {
        let patch = patch.normalized().map_err(InfraError::Validation)?;
        if patch.is_empty() {
            return Err(InfraError::Validation(
                "task update must change at least one field".to_string(),
            ));
        }
        self.ensure_task(task_id).await?;

        let remote = match task_id {
            Id::Remote(remote_id) => {
                match self.workspace.task_repository().update(remote_id, &patch).await {
                    Ok(updated) => updated,
                    Err(error) => {
                        warn!(user_id = %self.workspace.user_id(), task_id = %task_id, %error, "failed to update task remotely");
                        self.workspace.notify(Notification::warning(
                            "Saved offline",
                            "The change was saved on this device only.",
                        ));
                        None
                    }
                }
            }
            Id::Local(_) => None,
        };

        let mut data = self.workspace.lock().await;
        let unseen = data.unseen_pomodoros(task_id);
        if patch.completed.is_some() {
            if let Some(state) = data.unpushed.get_mut(task_id) {
                state.completed = false;
            }
        }
        let Some(task) = data.task_mut(task_id) else {
            return Err(InfraError::NotFound(format!("task {task_id}")));
        };
        match remote {
            Some(mut updated) => {
                updated.pomodoros = updated.pomodoros.saturating_add(unseen);
                *task = updated;
            }
            None => patch.apply(task),
        }
        let updated = task.clone();
        self.workspace.persist_tasks(&data);
        info!(user_id = %self.workspace.user_id(), task_id = %task_id, "task updated");
        Ok(updated)
    }

    /// Marks the task completed and clears the current-task pointer if it
    /// pointed at it. An unknown id is a logged no-op.
    pub async fn complete_task(&self, task_id: &Id) -> Result<Option<Task>, InfraError> {
        let patch = TaskPatch {
            completed: Some(true),
            ..TaskPatch::default()
        };
        let updated = match self.update_task(task_id, patch).await {
            Ok(task) => task,
            Err(InfraError::NotFound(_)) => {
                warn!(user_id = %self.workspace.user_id(), task_id = %task_id, "complete requested for unknown task");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let mut data = self.workspace.lock().await;
        if data.current_task_id.as_ref() == Some(task_id) {
            data.current_task_id = None;
            self.workspace.persist_current_task(&data);
        }
        Ok(Some(updated))
    }

    pub async fn delete_task(&self, task_id: &Id) -> Result<bool, InfraError> {
        self.ensure_task(task_id).await?;

        if let Id::Remote(remote_id) = task_id {
            match self.workspace.task_repository().delete(remote_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(user_id = %self.workspace.user_id(), task_id = %task_id, "task was already gone remotely");
                }
                Err(error) => {
                    warn!(user_id = %self.workspace.user_id(), task_id = %task_id, %error, "failed to delete task remotely");
                }
            }
        }

        let mut data = self.workspace.lock().await;
        let before = data.tasks.len();
        data.tasks.retain(|task| &task.id != task_id);
        let removed = data.tasks.len() != before;
        if data.current_task_id.as_ref() == Some(task_id) {
            data.current_task_id = None;
            self.workspace.persist_current_task(&data);
        }
        self.workspace.persist_tasks(&data);
        info!(user_id = %self.workspace.user_id(), task_id = %task_id, "task deleted");
        Ok(removed)
    }

    pub async fn select_task(&self, task_id: Option<&Id>) -> Result<Option<Task>, InfraError> {
        let mut data = self.workspace.lock().await;
        let selected = match task_id {
            Some(task_id) => Some(
                data.task(task_id)
                    .cloned()
                    .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?,
            ),
            None => None,
        };
        data.current_task_id = selected.as_ref().map(|task| task.id.clone());
        self.workspace.persist_current_task(&data);
        Ok(selected)
    }

    async fn ensure_task(&self, task_id: &Id) -> Result<(), InfraError> {
        let data = self.workspace.lock().await;
        if data.task(task_id).is_none() {
            return Err(InfraError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }
}
