use crate::application::bootstrap::bootstrap_workspace;
use crate::application::integrity::{DataIntegrityChecker, IntegrityReport};
use crate::application::sync::{RetryPolicy, SyncReport};
use crate::application::timer_runner::TimerStatus;
use crate::application::user_session::{SessionOptions, UserSession};
use crate::application::workspace::LoadSummary;
use crate::domain::models::{Id, Notification, Session, Settings, Task, TaskPatch};
use crate::infrastructure::auth::{AuthProvider, StaticAuthProvider};
use crate::infrastructure::config::{load_configs_from_env, AppConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCacheStore, SqliteLocalCache};
use crate::infrastructure::remote_store::{RemoteStore, ReqwestRemoteStore};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub struct AppState {
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    database_path: PathBuf,
    config: AppConfig,
    cache_store: Arc<dyn LocalCacheStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    sessions: Mutex<HashMap<String, Arc<UserSession>>>,
    background_sync: bool,
}

impl AppState {
    /// Bootstraps the workspace and wires the HTTP remote store from app.json
    /// plus environment overrides.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = load_configs_from_env(&bootstrap.config_dir)?;
        let base_url = config.api_base_url.as_deref().ok_or_else(|| {
            InfraError::InvalidConfig("apiBaseUrl is required (app.json or POMOSYNC_API_BASE_URL)".to_string())
        })?;
        let remote = ReqwestRemoteStore::new(
            base_url,
            config.access_token.clone(),
            config.request_timeout(),
        )?;
        let auth = match config.user_id.as_deref() {
            Some(user_id) => StaticAuthProvider::signed_in(user_id),
            None => StaticAuthProvider::default(),
        };
        Self::with_collaborators(&workspace_root, config, Arc::new(remote), Arc::new(auth))
    }

    pub fn with_collaborators(
        workspace_root: &Path,
        config: AppConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, InfraError> {
        config.validate()?;
        let bootstrap = bootstrap_workspace(workspace_root)?;
        let cache_store = Arc::new(SqliteLocalCache::new(&bootstrap.database_path));

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            logs_dir: bootstrap.logs_dir,
            database_path: bootstrap.database_path,
            config,
            cache_store,
            remote,
            auth,
            sessions: Mutex::new(HashMap::new()),
            background_sync: true,
        })
    }

    /// Disables the periodic sync for sessions opened afterwards.
    pub fn with_background_sync(mut self, enabled: bool) -> Self {
        self.background_sync = enabled;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        error!(command, "{message}");
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            sync_interval: self.config.sync_interval(),
            timer_state_debounce: self.config.timer_state_debounce(),
            retry_policy: RetryPolicy {
                max_attempts: self.config.retry_max_attempts,
                base_delay_ms: self.config.retry_base_delay_ms,
            },
            background_sync: self.background_sync,
        }
    }

    fn current_user_id(&self) -> Result<String, InfraError> {
        self.auth.current_user_id()?.ok_or(InfraError::Unauthenticated)
    }

    /// Returns the session of the signed-in user, opening it on first use.
    async fn active_session(&self) -> Result<Arc<UserSession>, InfraError> {
        let user_id = self.current_user_id()?;
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&user_id) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(
            UserSession::open(
                &user_id,
                Arc::clone(&self.remote),
                Arc::clone(&self.cache_store),
                self.session_options(),
            )
            .await?,
        );
        sessions.insert(user_id, Arc::clone(&session));
        Ok(session)
    }

    /// Closes every open session. Pending timer snapshots are flushed.
    pub async fn shutdown(&self) -> Result<(), InfraError> {
        let sessions: Vec<_> = self.sessions.lock().await.drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.close().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub load: LoadSummary,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

pub async fn login_impl(state: &AppState, user_id: Option<String>) -> Result<LoginResponse, InfraError> {
    if let Some(user_id) = user_id.as_deref() {
        state.auth.sign_in(user_id)?;
    }
    let session = state.active_session().await?;
    state.log_info(
        "login",
        &format!(
            "user {} loaded {} tasks and {} sessions",
            session.user_id(),
            session.load_summary().task_count,
            session.load_summary().session_count
        ),
    );
    Ok(LoginResponse {
        user_id: session.user_id().to_string(),
        load: session.load_summary().clone(),
    })
}

/// Stops the user's timer and periodic sync, then signs out. Returns false
/// when nobody was signed in.
pub async fn logout_impl(state: &AppState) -> Result<bool, InfraError> {
    let Some(user_id) = state.auth.current_user_id()? else {
        return Ok(false);
    };
    let session = state.sessions.lock().await.remove(&user_id);
    if let Some(session) = session {
        session.close().await?;
    }
    state.auth.sign_out()?;
    state.log_info("logout", &format!("user {user_id} signed out"));
    Ok(true)
}

pub async fn list_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    Ok(state.active_session().await?.tasks().list_tasks().await)
}

pub async fn create_task_impl(
    state: &AppState,
    title: String,
    description: Option<String>,
) -> Result<Task, InfraError> {
    let session = state.active_session().await?;
    let task = session
        .tasks()
        .add_task(&title, description.as_deref().unwrap_or_default())
        .await?;
    state.log_info("create_task", &format!("created task {}", task.id));
    Ok(task)
}

pub async fn update_task_impl(
    state: &AppState,
    task_id: String,
    input: UpdateTaskInput,
) -> Result<Task, InfraError> {
    let task_id = parse_task_id(&task_id)?;
    let patch = TaskPatch {
        title: input.title,
        description: input.description,
        completed: input.completed,
        pomodoros: None,
    };
    state
        .active_session()
        .await?
        .tasks()
        .update_task(&task_id, patch)
        .await
}

pub async fn complete_task_impl(state: &AppState, task_id: String) -> Result<Option<Task>, InfraError> {
    let task_id = parse_task_id(&task_id)?;
    state
        .active_session()
        .await?
        .tasks()
        .complete_task(&task_id)
        .await
}

pub async fn delete_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let task_id = parse_task_id(&task_id)?;
    let deleted = state
        .active_session()
        .await?
        .tasks()
        .delete_task(&task_id)
        .await?;
    state.log_info("delete_task", &format!("deleted task {task_id}"));
    Ok(deleted)
}

pub async fn select_task_impl(state: &AppState, task_id: Option<String>) -> Result<Option<Task>, InfraError> {
    let task_id = task_id.as_deref().map(parse_task_id).transpose()?;
    state
        .active_session()
        .await?
        .tasks()
        .select_task(task_id.as_ref())
        .await
}

pub async fn list_sessions_impl(state: &AppState) -> Result<Vec<Session>, InfraError> {
    Ok(state.active_session().await?.tasks().list_sessions().await)
}

pub async fn start_timer_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.start_timer().await
}

pub async fn pause_timer_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.pause_timer().await
}

pub async fn toggle_timer_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.toggle_timer().await
}

pub async fn reset_timer_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.reset_timer().await
}

pub async fn skip_timer_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.skip_timer().await
}

pub async fn get_timer_state_impl(state: &AppState) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.timer_status().await
}

pub async fn update_settings_impl(state: &AppState, settings: Settings) -> Result<TimerStatus, InfraError> {
    state.active_session().await?.update_settings(settings).await
}

pub async fn sync_now_impl(state: &AppState) -> Result<SyncReport, InfraError> {
    let report = state.active_session().await?.sync_now().await;
    if !report.skipped {
        state.log_info(
            "sync_now",
            &format!(
                "promoted {} tasks and {} sessions with {} failures",
                report.promoted_tasks,
                report.promoted_sessions,
                report.failures.len()
            ),
        );
    }
    Ok(report)
}

pub async fn check_integrity_impl(state: &AppState) -> Result<IntegrityReport, InfraError> {
    let user_id = state.current_user_id()?;
    let checker = DataIntegrityChecker::new(Arc::clone(&state.remote), Arc::clone(&state.cache_store));
    Ok(checker.check(&user_id).await)
}

pub async fn drain_notifications_impl(state: &AppState) -> Result<Vec<Notification>, InfraError> {
    Ok(state.active_session().await?.drain_notifications().await)
}

fn parse_task_id(value: &str) -> Result<Id, InfraError> {
    Id::parse(value).ok_or_else(|| InfraError::Validation("task_id must not be empty".to_string()))
}
