use crate::domain::models::{Id, Session, Settings, Task, TaskPatch, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::memory_store::InMemoryRemoteStore;
use crate::infrastructure::remote_store::RemoteStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

pub struct TempWorkspace {
    path: PathBuf,
}

impl TempWorkspace {
    pub fn new() -> Self {
        let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "pomosync-tests-{}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or(0),
            sequence
        ));
        fs::create_dir_all(&path).expect("create temp workspace");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

pub fn sample_task(user_id: &str, title: &str) -> Task {
    Task {
        id: Id::remote(format!("remote-{}", title.to_ascii_lowercase().replace(' ', "-"))),
        user_id: user_id.to_string(),
        title: title.to_string(),
        description: String::new(),
        completed: false,
        pomodoros: 0,
        created_at: fixed_time("2026-02-16T08:00:00Z"),
    }
}

pub fn sample_local_task(user_id: &str, title: &str) -> Task {
    Task::new_local(user_id, title, "", fixed_time("2026-02-16T08:00:00Z")).expect("valid task")
}

fn unavailable(action: &str) -> InfraError {
    InfraError::RemoteUnavailable(format!("network error while {action}: connection refused"))
}

/// Wraps the in-memory store and fails selected calls on demand.
#[derive(Debug, Default)]
pub struct FlakyRemoteStore {
    pub inner: InMemoryRemoteStore,
    offline: AtomicBool,
    fail_session_creates: AtomicBool,
    fail_task_refetch: AtomicBool,
    fail_task_updates: AtomicBool,
    failing_titles: Mutex<HashSet<String>>,
    pending_list_failures: AtomicUsize,
    pub create_task_calls: AtomicUsize,
    pub update_task_calls: AtomicUsize,
    pub create_session_calls: AtomicUsize,
    pub list_task_calls: AtomicUsize,
    pub list_session_calls: AtomicUsize,
    pub timer_state_writes: AtomicUsize,
}

impl FlakyRemoteStore {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_session_creates(&self, fail: bool) {
        self.fail_session_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_task_refetch(&self, fail: bool) {
        self.fail_task_refetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_task_updates(&self, fail: bool) {
        self.fail_task_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_task_title(&self, title: &str) {
        self.failing_titles
            .lock()
            .expect("failing titles lock poisoned")
            .insert(title.to_string());
    }

    /// The next `count` list calls (tasks or sessions) fail as unreachable.
    pub fn fail_next_lists(&self, count: usize) {
        self.pending_list_failures.store(count, Ordering::SeqCst);
    }

    fn check_online(&self, action: &str) -> Result<(), InfraError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable(action));
        }
        Ok(())
    }

    fn check_list(&self, action: &str) -> Result<(), InfraError> {
        self.check_online(action)?;
        let consumed = self
            .pending_list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if consumed {
            return Err(unavailable(action));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemoteStore {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        self.list_task_calls.fetch_add(1, Ordering::SeqCst);
        self.check_list("listing tasks")?;
        self.inner.list_tasks(user_id).await
    }

    async fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>, InfraError> {
        self.check_online("fetching task")?;
        if self.fail_task_refetch.load(Ordering::SeqCst) {
            return Err(unavailable("fetching task"));
        }
        self.inner.get_task(user_id, task_id).await
    }

    async fn create_task(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Task, InfraError> {
        self.create_task_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("creating task")?;
        let failing = self
            .failing_titles
            .lock()
            .expect("failing titles lock poisoned")
            .contains(title);
        if failing {
            return Err(unavailable("creating task"));
        }
        self.inner.create_task(user_id, title, description).await
    }

    async fn update_task(
        &self,
        user_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError> {
        self.update_task_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("updating task")?;
        if self.fail_task_updates.load(Ordering::SeqCst) {
            return Err(unavailable("updating task"));
        }
        self.inner.update_task(user_id, task_id, patch).await
    }

    async fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool, InfraError> {
        self.check_online("deleting task")?;
        self.inner.delete_task(user_id, task_id).await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, InfraError> {
        self.list_session_calls.fetch_add(1, Ordering::SeqCst);
        self.check_list("listing sessions")?;
        self.inner.list_sessions(user_id).await
    }

    async fn create_session(
        &self,
        user_id: &str,
        task_id: &str,
        task_title: &str,
        duration: u32,
    ) -> Result<Session, InfraError> {
        self.create_session_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("creating session")?;
        if self.fail_session_creates.load(Ordering::SeqCst) {
            return Err(unavailable("creating session"));
        }
        self.inner
            .create_session(user_id, task_id, task_title, duration)
            .await
    }

    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, InfraError> {
        self.check_online("fetching settings")?;
        self.inner.get_settings(user_id).await
    }

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &Settings,
    ) -> Result<Settings, InfraError> {
        self.check_online("updating settings")?;
        self.inner.update_settings(user_id, settings).await
    }

    async fn get_timer_state(&self, user_id: &str) -> Result<Option<TimerState>, InfraError> {
        self.check_online("fetching timer state")?;
        self.inner.get_timer_state(user_id).await
    }

    async fn update_timer_state(
        &self,
        user_id: &str,
        state: &TimerState,
    ) -> Result<TimerState, InfraError> {
        self.timer_state_writes.fetch_add(1, Ordering::SeqCst);
        self.check_online("updating timer state")?;
        self.inner.update_timer_state(user_id, state).await
    }
}
