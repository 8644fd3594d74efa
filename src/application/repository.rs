//! Dual-write repositories: the remote store is canonical, the device cache
//! mirrors every in-memory mutation regardless of remote outcome.

use crate::domain::models::{Id, Session, Task, TaskPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::UserCache;
use crate::infrastructure::remote_store::RemoteStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Remote,
    Cache,
}

/// Outcome of promoting a local task. The task is remote as soon as the
/// create call succeeded; `update_error` is set when its state could not be
/// copied over afterwards.
#[derive(Debug)]
pub struct PromotedTask {
    pub task: Task,
    pub update_error: Option<InfraError>,
}

#[derive(Clone)]
pub struct TaskRepository {
    user_id: String,
    remote: Arc<dyn RemoteStore>,
    cache: UserCache,
}

impl TaskRepository {
    pub fn new(user_id: impl Into<String>, remote: Arc<dyn RemoteStore>, cache: UserCache) -> Self {
        Self {
            user_id: user_id.into(),
            remote,
            cache,
        }
    }

    /// Non-empty remote data wins and is mirrored into the cache, keeping the
    /// cached tasks that were never promoted. An empty or failed remote fetch
    /// falls back to the cached copy.
    pub async fn load_prefer_remote(&self) -> Result<(Vec<Task>, LoadSource), InfraError> {
        match self.remote.list_tasks(&self.user_id).await {
            Ok(mut tasks) if !tasks.is_empty() => {
                tasks.extend(
                    self.cache
                        .load_tasks()?
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|task| task.id.is_local()),
                );
                self.write_through(&tasks)?;
                return Ok((tasks, LoadSource::Remote));
            }
            Ok(_) => {}
            Err(error) if error.is_remote() => {
                warn!(user_id = %self.user_id, %error, "failed to load tasks remotely, using cache");
            }
            Err(error) => return Err(error),
        }
        let cached = self.cache.load_tasks()?.unwrap_or_default();
        Ok((cached, LoadSource::Cache))
    }

    pub fn write_through(&self, tasks: &[Task]) -> Result<(), InfraError> {
        self.cache.save_tasks(tasks)
    }

    pub async fn fetch_all(&self) -> Result<Vec<Task>, InfraError> {
        self.remote.list_tasks(&self.user_id).await
    }

    pub async fn fetch(&self, remote_id: &str) -> Result<Option<Task>, InfraError> {
        self.remote.get_task(&self.user_id, remote_id).await
    }

    pub async fn create(&self, title: &str, description: &str) -> Result<Task, InfraError> {
        self.remote.create_task(&self.user_id, title, description).await
    }

    pub async fn update(&self, remote_id: &str, patch: &TaskPatch) -> Result<Option<Task>, InfraError> {
        self.remote.update_task(&self.user_id, remote_id, patch).await
    }

    pub async fn delete(&self, remote_id: &str) -> Result<bool, InfraError> {
        self.remote.delete_task(&self.user_id, remote_id).await
    }

    /// Creates a local task remotely and copies its state over.
    ///
    /// `pending_sessions` local sessions of this task are still waiting for
    /// promotion; each of them increments the counter remotely when created,
    /// so they are left out of the pushed count.
    pub async fn promote_local(
        &self,
        task: &Task,
        pending_sessions: u32,
    ) -> Result<PromotedTask, InfraError> {
        let local_id = match &task.id {
            Id::Local(value) => value,
            Id::Remote(_) => {
                return Err(InfraError::Validation(format!(
                    "task {} is already remote",
                    task.id
                )));
            }
        };

        let created = self.create(&task.title, &task.description).await?;
        let Some(remote_id) = created.id.as_remote().map(ToOwned::to_owned) else {
            return Err(InfraError::InvalidResponse(format!(
                "remote store returned a local id for promoted task {local_id}"
            )));
        };

        let pomodoros = task.pomodoros.saturating_sub(pending_sessions);
        let patch = TaskPatch {
            completed: task.completed.then_some(true),
            pomodoros: (pomodoros > 0).then_some(pomodoros),
            ..TaskPatch::default()
        };
        if patch.is_empty() {
            return Ok(PromotedTask {
                task: created,
                update_error: None,
            });
        }

        match self.update(&remote_id, &patch).await {
            Ok(updated) => {
                let mut promoted = updated.unwrap_or(created);
                patch.apply(&mut promoted);
                Ok(PromotedTask {
                    task: promoted,
                    update_error: None,
                })
            }
            Err(error) => Ok(PromotedTask {
                task: created,
                update_error: Some(error),
            }),
        }
    }
}

#[derive(Clone)]
pub struct SessionRepository {
    user_id: String,
    remote: Arc<dyn RemoteStore>,
    cache: UserCache,
}

impl SessionRepository {
    pub fn new(user_id: impl Into<String>, remote: Arc<dyn RemoteStore>, cache: UserCache) -> Self {
        Self {
            user_id: user_id.into(),
            remote,
            cache,
        }
    }

    pub async fn load_prefer_remote(&self) -> Result<(Vec<Session>, LoadSource), InfraError> {
        match self.remote.list_sessions(&self.user_id).await {
            Ok(mut sessions) if !sessions.is_empty() => {
                sessions.extend(
                    self.cache
                        .load_sessions()?
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|session| session.id.is_local()),
                );
                self.write_through(&sessions)?;
                return Ok((sessions, LoadSource::Remote));
            }
            Ok(_) => {}
            Err(error) if error.is_remote() => {
                warn!(user_id = %self.user_id, %error, "failed to load sessions remotely, using cache");
            }
            Err(error) => return Err(error),
        }
        let cached = self.cache.load_sessions()?.unwrap_or_default();
        Ok((cached, LoadSource::Cache))
    }

    pub fn write_through(&self, sessions: &[Session]) -> Result<(), InfraError> {
        self.cache.save_sessions(sessions)
    }

    pub async fn fetch_all(&self) -> Result<Vec<Session>, InfraError> {
        self.remote.list_sessions(&self.user_id).await
    }

    pub async fn record(
        &self,
        remote_task_id: &str,
        task_title: &str,
        duration: u32,
    ) -> Result<Session, InfraError> {
        self.remote
            .create_session(&self.user_id, remote_task_id, task_title, duration)
            .await
    }

    /// Creates a local session remotely against the already-remote task id.
    pub async fn promote_local(&self, session: &Session, remote_task_id: &str) -> Result<Session, InfraError> {
        if !session.id.is_local() {
            return Err(InfraError::Validation(format!(
                "session {} is already remote",
                session.id
            )));
        }
        self.record(remote_task_id, &session.task_title, session.duration)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_cache::InMemoryLocalCache;
    use crate::test_support::{sample_local_task, sample_task, FlakyRemoteStore};
    use std::sync::atomic::Ordering;

    fn repositories(remote: &Arc<FlakyRemoteStore>) -> (TaskRepository, SessionRepository, UserCache) {
        let cache = UserCache::new(Arc::new(InMemoryLocalCache::default()), "alice");
        let remote: Arc<dyn RemoteStore> = Arc::clone(remote) as Arc<dyn RemoteStore>;
        (
            TaskRepository::new("alice", Arc::clone(&remote), cache.clone()),
            SessionRepository::new("alice", remote, cache.clone()),
            cache,
        )
    }

    #[tokio::test]
    async fn load_prefers_non_empty_remote_and_mirrors_cache() {
        let remote = Arc::new(FlakyRemoteStore::default());
        remote.inner.create_task("alice", "Remote task", "").await.expect("seed task");
        let (tasks, _, cache) = repositories(&remote);
        let offline = sample_local_task("alice", "Offline task");
        cache
            .save_tasks(&[sample_task("alice", "Stale cached task"), offline.clone()])
            .expect("seed cache");

        let (loaded, source) = tasks.load_prefer_remote().await.expect("load tasks");
        assert_eq!(source, LoadSource::Remote);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, "Remote task");
        assert_eq!(loaded[1], offline);
        assert_eq!(cache.load_tasks().expect("cached tasks"), Some(loaded));
    }

    #[tokio::test]
    async fn load_falls_back_to_cache_when_remote_empty_or_down() {
        let remote = Arc::new(FlakyRemoteStore::default());
        let (tasks, sessions, cache) = repositories(&remote);
        let cached_task = sample_local_task("alice", "Cached task");
        cache.save_tasks(std::slice::from_ref(&cached_task)).expect("seed cache");

        let (loaded, source) = tasks.load_prefer_remote().await.expect("load empty remote");
        assert_eq!(source, LoadSource::Cache);
        assert_eq!(loaded, vec![cached_task.clone()]);

        remote.set_offline(true);
        let (loaded, source) = tasks.load_prefer_remote().await.expect("load offline");
        assert_eq!(source, LoadSource::Cache);
        assert_eq!(loaded, vec![cached_task]);

        let (loaded, source) = sessions.load_prefer_remote().await.expect("load sessions offline");
        assert_eq!(source, LoadSource::Cache);
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn promote_local_task_pushes_state_minus_pending_sessions() {
        let remote = Arc::new(FlakyRemoteStore::default());
        let (tasks, _, _) = repositories(&remote);
        let mut local = sample_local_task("alice", "Offline task");
        local.pomodoros = 3;
        local.completed = true;

        let promoted = tasks.promote_local(&local, 1).await.expect("promote task");
        assert!(promoted.update_error.is_none());
        let promoted = promoted.task;
        assert!(!promoted.id.is_local());
        assert_eq!(promoted.pomodoros, 2);
        assert!(promoted.completed);
        assert_eq!(remote.update_task_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn promote_local_task_skips_update_when_nothing_to_push() {
        let remote = Arc::new(FlakyRemoteStore::default());
        let (tasks, _, _) = repositories(&remote);
        let mut local = sample_local_task("alice", "Fresh task");
        local.pomodoros = 1;

        let promoted = tasks.promote_local(&local, 1).await.expect("promote task").task;
        assert_eq!(promoted.pomodoros, 0);
        assert_eq!(remote.update_task_calls.load(Ordering::SeqCst), 0);

        let error = tasks.promote_local(&promoted, 0).await.expect_err("already remote");
        assert!(matches!(error, InfraError::Validation(_)));
    }

    #[tokio::test]
    async fn promote_local_task_stays_promoted_when_copying_state_fails() {
        let remote = Arc::new(FlakyRemoteStore::default());
        remote.fail_task_updates(true);
        let (tasks, _, _) = repositories(&remote);
        let mut local = sample_local_task("alice", "Half synced task");
        local.completed = true;

        let promoted = tasks.promote_local(&local, 0).await.expect("create succeeded");
        assert!(!promoted.task.id.is_local());
        assert!(!promoted.task.completed);
        assert!(matches!(promoted.update_error, Some(InfraError::RemoteUnavailable(_))));
        assert_eq!(remote.inner.list_tasks("alice").await.expect("list").len(), 1);
    }
}
