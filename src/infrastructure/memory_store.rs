//! Process-local remote store used by tests. It applies the same
//! server-side rules as the HTTP backend.

use crate::domain::models::{Id, Session, Settings, Task, TaskPatch, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_store::RemoteStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct InMemoryRemoteState {
    tasks: Vec<Task>,
    sessions: Vec<Session>,
    settings: HashMap<String, Settings>,
    timer_states: HashMap<String, TimerState>,
    next_id: u64,
}

impl InMemoryRemoteState {
    fn next_id(&mut self, prefix: &str) -> Id {
        self.next_id += 1;
        Id::remote(format!("{prefix}{:08x}", self.next_id))
    }

    fn task_mut(&mut self, user_id: &str, task_id: &str) -> Option<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.user_id == user_id && task.id.as_remote() == Some(task_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<InMemoryRemoteState>,
}

impl InMemoryRemoteStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryRemoteState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("remote store", error))
    }

    fn bad_request(message: &str) -> InfraError {
        InfraError::RemoteRejected {
            status: StatusCode::BAD_REQUEST.as_u16(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .iter()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>, InfraError> {
        let mut state = self.lock()?;
        Ok(state.task_mut(user_id, task_id).map(|task| task.clone()))
    }

    async fn create_task(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Task, InfraError> {
        if title.trim().is_empty() {
            return Err(Self::bad_request("Title is required"));
        }
        let mut state = self.lock()?;
        let task = Task {
            id: state.next_id("t"),
            user_id: user_id.to_string(),
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            completed: false,
            pomodoros: 0,
            created_at: Utc::now(),
        };
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        user_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError> {
        let mut state = self.lock()?;
        let Some(task) = state.task_mut(user_id, task_id) else {
            return Ok(None);
        };
        patch.apply(task);
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock()?;
        let before = state.tasks.len();
        state
            .tasks
            .retain(|task| !(task.user_id == user_id && task.id.as_remote() == Some(task_id)));
        if state.tasks.len() == before {
            return Ok(false);
        }
        state.sessions.retain(|session| {
            !(session.user_id == user_id && session.task_id.as_remote() == Some(task_id))
        });
        Ok(true)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_session(
        &self,
        user_id: &str,
        task_id: &str,
        task_title: &str,
        duration: u32,
    ) -> Result<Session, InfraError> {
        if task_id.trim().is_empty() || duration == 0 {
            return Err(Self::bad_request("TaskId and duration are required"));
        }
        let mut state = self.lock()?;
        let session = Session {
            id: state.next_id("s"),
            user_id: user_id.to_string(),
            task_id: Id::remote(task_id),
            task_title: task_title.to_string(),
            duration,
            completed_at: Utc::now(),
        };
        state.sessions.push(session.clone());
        if let Some(task) = state.task_mut(user_id, task_id) {
            task.pomodoros = task.pomodoros.saturating_add(1);
        }
        Ok(session)
    }

    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, InfraError> {
        Ok(self.lock()?.settings.get(user_id).cloned())
    }

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &Settings,
    ) -> Result<Settings, InfraError> {
        self.lock()?
            .settings
            .insert(user_id.to_string(), settings.clone());
        Ok(settings.clone())
    }

    async fn get_timer_state(&self, user_id: &str) -> Result<Option<TimerState>, InfraError> {
        Ok(self.lock()?.timer_states.get(user_id).cloned())
    }

    async fn update_timer_state(
        &self,
        user_id: &str,
        state: &TimerState,
    ) -> Result<TimerState, InfraError> {
        let mut stored = state.clone();
        stored.updated_at = Utc::now();
        self.lock()?
            .timer_states
            .insert(user_id.to_string(), stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Counts;

    #[tokio::test]
    async fn session_creation_increments_task_counter() {
        let store = InMemoryRemoteStore::default();
        let task = store
            .create_task("alice", "Write report", "")
            .await
            .expect("create task");
        let task_id = task.id.as_remote().expect("remote id").to_string();

        store
            .create_session("alice", &task_id, &task.title, 25)
            .await
            .expect("create session");
        let refreshed = store
            .get_task("alice", &task_id)
            .await
            .expect("get task")
            .expect("task exists");
        assert_eq!(refreshed.pomodoros, 1);
        assert_eq!(store.get_task("bob", &task_id).await.expect("get task"), None);
    }

    #[tokio::test]
    async fn delete_cascades_sessions() {
        let store = InMemoryRemoteStore::default();
        let task = store
            .create_task("alice", "Write report", "")
            .await
            .expect("create task");
        let task_id = task.id.as_remote().expect("remote id").to_string();
        store
            .create_session("alice", &task_id, &task.title, 25)
            .await
            .expect("create session");

        assert!(store.delete_task("alice", &task_id).await.expect("delete task"));
        assert!(!store.delete_task("alice", &task_id).await.expect("delete missing"));
        let counts = store.counts("alice").await.expect("counts");
        assert_eq!(counts, Counts { tasks: 0, sessions: 0 });
    }

    #[tokio::test]
    async fn rejects_missing_fields() {
        let store = InMemoryRemoteStore::default();
        assert!(matches!(
            store.create_task("alice", "  ", "").await,
            Err(InfraError::RemoteRejected { status: 400, .. })
        ));
        assert!(matches!(
            store.create_session("alice", "t1", "Title", 0).await,
            Err(InfraError::RemoteRejected { status: 400, .. })
        ));
    }
}
