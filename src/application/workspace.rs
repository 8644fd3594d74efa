use crate::application::repository::{LoadSource, SessionRepository, TaskRepository};
use crate::domain::models::{Id, Notification, Session, Settings, Task, TimerState};
use crate::infrastructure::local_cache::UserCache;
use crate::infrastructure::remote_store::RemoteStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastSyncResult {
    pub outcome: SyncOutcome,
    pub at: DateTime<Utc>,
    pub failures: usize,
}

/// State of a promoted task that the remote store has not accepted yet.
/// `pomodoros` counts completions the server has not seen through sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpushedTaskState {
    pub completed: bool,
    pub pomodoros: u32,
}

/// In-memory collections of one user. Only touched while holding the
/// workspace lock.
#[derive(Debug, Default)]
pub struct WorkspaceData {
    pub tasks: Vec<Task>,
    pub sessions: Vec<Session>,
    pub current_task_id: Option<Id>,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_sync_result: Option<LastSyncResult>,
    pub unpushed: HashMap<Id, UnpushedTaskState>,
}

impl WorkspaceData {
    pub fn task(&self, id: &Id) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn task_mut(&mut self, id: &Id) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| &task.id == id)
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task_id.as_ref().and_then(|id| self.task(id))
    }

    pub fn pending_sessions_for(&self, task_id: &Id) -> u32 {
        let count = self
            .sessions
            .iter()
            .filter(|session| session.id.is_local() && &session.task_id == task_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Completions of a task that the remote counter does not include yet.
    pub fn unseen_pomodoros(&self, task_id: &Id) -> u32 {
        let unpushed = self.unpushed.get(task_id).map_or(0, |state| state.pomodoros);
        self.pending_sessions_for(task_id).saturating_add(unpushed)
    }

    /// Rewrites every reference to `from` once a task has been promoted.
    pub fn remap_task_id(&mut self, from: &Id, to: &Id) {
        for session in self.sessions.iter_mut().filter(|session| &session.task_id == from) {
            session.task_id = to.clone();
        }
        if self.current_task_id.as_ref() == Some(from) {
            self.current_task_id = Some(to.clone());
        }
    }

    /// Replaces the task collection with canonical remote data while keeping
    /// tasks that are still waiting for promotion. Remote counters are raised
    /// by the completions the server has not seen yet.
    pub fn replace_tasks(&mut self, remote: Vec<Task>) {
        let mut merged = remote;
        for task in merged.iter_mut().filter(|task| !task.id.is_local()) {
            task.pomodoros = task.pomodoros.saturating_add(self.unseen_pomodoros(&task.id));
            if self.unpushed.get(&task.id).is_some_and(|state| state.completed) {
                task.completed = true;
            }
        }
        self.unpushed
            .retain(|id, _| merged.iter().any(|task| &task.id == id));
        let pending = self.tasks.drain(..).filter(|task| task.id.is_local());
        merged.extend(pending);
        self.tasks = merged;
        if self.current_task().is_none() {
            self.current_task_id = None;
        }
    }

    pub fn replace_sessions(&mut self, remote: Vec<Session>) {
        let pending = self.sessions.drain(..).filter(|session| session.id.is_local());
        let mut merged = remote;
        merged.extend(pending);
        self.sessions = merged;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub tasks_source: LoadSource,
    pub sessions_source: LoadSource,
    pub task_count: usize,
    pub session_count: usize,
}

pub struct UserWorkspace {
    user_id: String,
    data: Mutex<WorkspaceData>,
    tasks: TaskRepository,
    sessions: SessionRepository,
    cache: UserCache,
    remote: Arc<dyn RemoteStore>,
    notifications: mpsc::UnboundedSender<Notification>,
    now_provider: NowProvider,
}

impl UserWorkspace {
    pub fn new(
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
        cache: UserCache,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            tasks: TaskRepository::new(user_id.clone(), Arc::clone(&remote), cache.clone()),
            sessions: SessionRepository::new(user_id.clone(), Arc::clone(&remote), cache.clone()),
            user_id,
            data: Mutex::new(WorkspaceData::default()),
            cache,
            remote,
            notifications,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn cache(&self) -> &UserCache {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn task_repository(&self) -> &TaskRepository {
        &self.tasks
    }

    pub fn session_repository(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn now_provider(&self) -> NowProvider {
        Arc::clone(&self.now_provider)
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn notify(&self, notification: Notification) {
        debug!(user_id = %self.user_id, title = %notification.title, "notification");
        let _ = self.notifications.send(notification);
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorkspaceData> {
        self.data.lock().await
    }

    pub fn persist_tasks(&self, data: &WorkspaceData) {
        if let Err(error) = self.tasks.write_through(&data.tasks) {
            warn!(user_id = %self.user_id, %error, "failed to cache tasks");
        }
    }

    pub fn persist_sessions(&self, data: &WorkspaceData) {
        if let Err(error) = self.sessions.write_through(&data.sessions) {
            warn!(user_id = %self.user_id, %error, "failed to cache sessions");
        }
    }

    pub fn persist_current_task(&self, data: &WorkspaceData) {
        if let Err(error) = self.cache.set_current_task_id(data.current_task_id.as_ref()) {
            warn!(user_id = %self.user_id, %error, "failed to cache current task");
        }
    }

    /// Remote-first load of both collections with cache fallback. Restores
    /// the current-task pointer when it still resolves.
    pub async fn load(&self) -> LoadSummary {
        let (tasks, tasks_source) = match self.tasks.load_prefer_remote().await {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(user_id = %self.user_id, %error, "failed to load tasks");
                (Vec::new(), LoadSource::Cache)
            }
        };
        let (sessions, sessions_source) = match self.sessions.load_prefer_remote().await {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(user_id = %self.user_id, %error, "failed to load sessions");
                (Vec::new(), LoadSource::Cache)
            }
        };
        let current_task_id = self.cache.current_task_id().unwrap_or_else(|error| {
            warn!(user_id = %self.user_id, %error, "failed to read current task");
            None
        });
        let last_synced = self.cache.last_synced().unwrap_or_else(|error| {
            warn!(user_id = %self.user_id, %error, "failed to read last synced time");
            None
        });

        let current_task_id =
            current_task_id.filter(|id| tasks.iter().any(|task| &task.id == id));
        let mut data = self.lock().await;
        data.sessions = sessions;
        match tasks_source {
            LoadSource::Remote => {
                data.tasks.clear();
                data.replace_tasks(tasks);
                self.persist_tasks(&data);
            }
            LoadSource::Cache => data.tasks = tasks,
        }
        data.current_task_id = current_task_id;
        data.last_synced = last_synced;

        let summary = LoadSummary {
            tasks_source,
            sessions_source,
            task_count: data.tasks.len(),
            session_count: data.sessions.len(),
        };
        info!(
            user_id = %self.user_id,
            tasks = summary.task_count,
            sessions = summary.session_count,
            tasks_source = ?summary.tasks_source,
            sessions_source = ?summary.sessions_source,
            "workspace loaded"
        );
        summary
    }

    pub async fn load_settings(&self) -> Settings {
        match self.remote.get_settings(&self.user_id).await {
            Ok(Some(settings)) if settings.validate().is_ok() => {
                if let Err(error) = self.cache.save_settings(&settings) {
                    warn!(user_id = %self.user_id, %error, "failed to cache settings");
                }
                return settings;
            }
            Ok(Some(_)) => warn!(user_id = %self.user_id, "ignoring invalid remote settings"),
            Ok(None) => {}
            Err(error) => warn!(user_id = %self.user_id, %error, "failed to load settings remotely"),
        }
        match self.cache.load_settings() {
            Ok(Some(settings)) if settings.validate().is_ok() => settings,
            Ok(_) => Settings::default(),
            Err(error) => {
                warn!(user_id = %self.user_id, %error, "failed to read cached settings");
                Settings::default()
            }
        }
    }

    pub async fn load_timer_state(&self) -> Option<TimerState> {
        match self.remote.get_timer_state(&self.user_id).await {
            Ok(Some(state)) => return Some(state),
            Ok(None) => {}
            Err(error) => warn!(user_id = %self.user_id, %error, "failed to load timer state remotely"),
        }
        self.cache.load_timer_state().unwrap_or_else(|error| {
            warn!(user_id = %self.user_id, %error, "failed to read cached timer state");
            None
        })
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.lock().await.tasks.clone()
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.lock().await.sessions.clone()
    }

    pub async fn current_task_id(&self) -> Option<Id> {
        self.lock().await.current_task_id.clone()
    }

    pub async fn current_task(&self) -> Option<Task> {
        self.lock().await.current_task().cloned()
    }

    pub async fn last_sync_result(&self) -> Option<LastSyncResult> {
        self.lock().await.last_sync_result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_cache::InMemoryLocalCache;
    use crate::test_support::{sample_local_task, sample_task, FlakyRemoteStore};

    fn workspace(remote: &Arc<FlakyRemoteStore>) -> (UserWorkspace, UserCache) {
        let cache = UserCache::new(Arc::new(InMemoryLocalCache::default()), "alice");
        let (notifications, _receiver) = mpsc::unbounded_channel();
        let workspace = UserWorkspace::new(
            "alice",
            Arc::clone(remote) as Arc<dyn RemoteStore>,
            cache.clone(),
            notifications,
        );
        (workspace, cache)
    }

    #[tokio::test]
    async fn load_restores_pointer_only_when_task_exists() {
        let remote = Arc::new(FlakyRemoteStore::default());
        remote.set_offline(true);
        let (workspace, cache) = workspace(&remote);
        let task = sample_local_task("alice", "Cached task");
        cache.save_tasks(std::slice::from_ref(&task)).expect("seed tasks");
        cache.set_current_task_id(Some(&task.id)).expect("seed pointer");

        let summary = workspace.load().await;
        assert_eq!(summary.tasks_source, LoadSource::Cache);
        assert_eq!(summary.task_count, 1);
        assert_eq!(workspace.current_task_id().await, Some(task.id.clone()));

        cache
            .set_current_task_id(Some(&Id::remote("gone")))
            .expect("seed dangling pointer");
        workspace.load().await;
        assert_eq!(workspace.current_task_id().await, None);
    }

    #[tokio::test]
    async fn settings_fall_back_from_remote_to_cache_to_defaults() {
        let remote = Arc::new(FlakyRemoteStore::default());
        let (workspace, cache) = workspace(&remote);
        assert_eq!(workspace.load_settings().await, Settings::default());

        let mut cached = Settings::default();
        cached.work_duration = 40;
        cache.save_settings(&cached).expect("seed cached settings");
        assert_eq!(workspace.load_settings().await, cached);

        let mut remote_settings = Settings::default();
        remote_settings.work_duration = 50;
        remote
            .inner
            .update_settings("alice", &remote_settings)
            .await
            .expect("seed remote settings");
        assert_eq!(workspace.load_settings().await, remote_settings);
        assert_eq!(cache.load_settings().expect("cached settings"), Some(remote_settings));
    }

    #[test]
    fn replace_keeps_pending_records_and_remap_rewrites_references() {
        let mut data = WorkspaceData::default();
        let local = sample_local_task("alice", "Offline task");
        let session = Session::new_local(&local, 25, local.created_at);
        data.tasks.push(local.clone());
        data.sessions.push(session);
        data.current_task_id = Some(local.id.clone());

        assert_eq!(data.pending_sessions_for(&local.id), 1);
        let remote_id = Id::remote("t1");
        data.remap_task_id(&local.id, &remote_id);
        assert_eq!(data.sessions[0].task_id, remote_id);
        assert_eq!(data.current_task_id, Some(remote_id.clone()));

        data.replace_tasks(Vec::new());
        assert_eq!(data.tasks.len(), 1);
        assert_eq!(data.current_task_id, None);

        data.replace_sessions(Vec::new());
        assert_eq!(data.sessions.len(), 1);
    }

    #[tokio::test]
    async fn remote_load_counts_cached_offline_sessions() {
        let remote = Arc::new(FlakyRemoteStore::default());
        let (workspace, cache) = workspace(&remote);
        let mut task = remote.inner.create_task("alice", "Remote task", "").await.expect("seed task");
        let offline = sample_local_task("alice", "Offline task");
        let session = Session::new_local(&task, 25, task.created_at);
        task.pomodoros = 1;
        cache.save_tasks(&[task.clone(), offline.clone()]).expect("seed tasks");
        cache.save_sessions(std::slice::from_ref(&session)).expect("seed sessions");

        let summary = workspace.load().await;
        assert_eq!(summary.tasks_source, LoadSource::Remote);
        assert_eq!(summary.task_count, 2);
        assert_eq!(workspace.tasks().await, vec![task.clone(), offline]);
        assert_eq!(workspace.sessions().await, vec![session]);
        let cached = cache.load_tasks().expect("cached tasks").expect("tasks present");
        assert_eq!(cached[0].pomodoros, 1);
    }

    #[test]
    fn replace_adds_unseen_completions_to_remote_counters() {
        let mut data = WorkspaceData::default();
        let mut task = sample_task("alice", "Remote task");
        data.sessions.push(Session::new_local(&task, 25, task.created_at));
        data.unpushed.insert(
            task.id.clone(),
            UnpushedTaskState {
                completed: true,
                pomodoros: 2,
            },
        );
        task.pomodoros = 4;

        data.replace_tasks(vec![task.clone()]);
        assert_eq!(data.tasks[0].pomodoros, 7);
        assert!(data.tasks[0].completed);
        assert_eq!(data.unseen_pomodoros(&task.id), 3);

        data.replace_tasks(Vec::new());
        assert!(data.tasks.is_empty());
        assert!(data.unpushed.is_empty());
    }
}
