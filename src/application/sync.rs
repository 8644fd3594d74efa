use crate::application::repository::PromotedTask;
use crate::application::workspace::{LastSyncResult, SyncOutcome, UnpushedTaskState, UserWorkspace};
use crate::domain::models::{Id, Notification, Session, Task, TaskPatch};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration as TokioDuration, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    PromoteTask,
    /// Copying the state of a promoted task onto its remote record.
    UpdatePromotedTask,
    RefreshTasks,
    PromoteSession,
    RefreshSessions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub step: SyncStep,
    pub id: Option<Id>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another sync was already running; nothing was done.
    pub skipped: bool,
    pub promoted_tasks: usize,
    pub promoted_sessions: usize,
    /// Local sessions left pending because their task is still local.
    pub deferred_sessions: usize,
    pub tasks_refreshed: bool,
    pub sessions_refreshed: bool,
    pub failures: Vec<SyncFailure>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.skipped && self.failures.is_empty()
    }

    fn fail(&mut self, step: SyncStep, id: Option<Id>, error: &InfraError) {
        self.failures.push(SyncFailure {
            step,
            id,
            message: error.to_string(),
        });
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Promotes local records and refreshes both collections from the remote store.
pub struct ReconciliationSync {
    workspace: Arc<UserWorkspace>,
    retry_policy: RetryPolicy,
    in_flight: AtomicBool,
}

impl ReconciliationSync {
    pub fn new(workspace: Arc<UserWorkspace>) -> Self {
        Self {
            workspace,
            retry_policy: RetryPolicy::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn workspace(&self) -> &Arc<UserWorkspace> {
        &self.workspace
    }

    pub async fn sync_all(&self) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(user_id = %self.workspace.user_id(), "sync already in flight");
            return SyncReport::skipped();
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut report = SyncReport::default();
        self.push_unpushed(&mut report).await;
        let mapping = self.promote_tasks(&mut report).await;
        self.refresh_tasks(&mut report).await;
        self.promote_sessions(&mapping, &mut report).await;
        self.refresh_sessions(&mut report).await;
        if report.promoted_sessions > 0 {
            self.refresh_tasks(&mut report).await;
        }
        self.finish(&mut report).await;
        report
    }

    async fn promote_tasks(&self, report: &mut SyncReport) -> HashMap<Id, Id> {
        let pending: Vec<(Task, u32)> = {
            let data = self.workspace.lock().await;
            data.tasks
                .iter()
                .filter(|task| task.id.is_local())
                .map(|task| (task.clone(), data.pending_sessions_for(&task.id)))
                .collect()
        };

        let mut mapping = HashMap::new();
        for (task, pending_sessions) in pending {
            let promoted = self
                .workspace
                .task_repository()
                .promote_local(&task, pending_sessions)
                .await;
            match promoted {
                Ok(PromotedTask { task: promoted, update_error }) => {
                    let mut data = self.workspace.lock().await;
                    if let Some(slot) = data.task_mut(&task.id) {
                        let (pomodoros, completed) = (slot.pomodoros, slot.completed);
                        *slot = promoted.clone();
                        slot.pomodoros = pomodoros;
                        slot.completed = completed;
                    }
                    data.remap_task_id(&task.id, &promoted.id);
                    if let Some(error) = update_error {
                        warn!(user_id = %self.workspace.user_id(), task_id = %promoted.id, %error, "failed to copy promoted task state");
                        data.unpushed.insert(
                            promoted.id.clone(),
                            UnpushedTaskState {
                                completed: task.completed,
                                pomodoros: task.pomodoros.saturating_sub(pending_sessions),
                            },
                        );
                        report.fail(SyncStep::UpdatePromotedTask, Some(promoted.id.clone()), &error);
                    }
                    self.workspace.persist_tasks(&data);
                    self.workspace.persist_sessions(&data);
                    self.workspace.persist_current_task(&data);
                    debug!(local_id = %task.id, remote_id = %promoted.id, "task promoted");
                    mapping.insert(task.id.clone(), promoted.id);
                    report.promoted_tasks += 1;
                }
                Err(error) => {
                    warn!(user_id = %self.workspace.user_id(), task_id = %task.id, %error, "failed to promote task");
                    report.fail(SyncStep::PromoteTask, Some(task.id), &error);
                }
            }
        }
        mapping
    }

    /// Retries copying state onto tasks that were created remotely by an
    /// earlier sync whose follow-up update failed.
    async fn push_unpushed(&self, report: &mut SyncReport) {
        let pending: Vec<(Id, String, TaskPatch)> = {
            let data = self.workspace.lock().await;
            data.unpushed
                .keys()
                .filter_map(|id| {
                    let remote_id = id.as_remote()?.to_string();
                    let task = data.task(id)?;
                    let pomodoros = task.pomodoros.saturating_sub(data.pending_sessions_for(id));
                    let patch = TaskPatch {
                        completed: Some(task.completed),
                        pomodoros: Some(pomodoros),
                        ..TaskPatch::default()
                    };
                    Some((id.clone(), remote_id, patch))
                })
                .collect()
        };

        let repository = self.workspace.task_repository();
        for (id, remote_id, patch) in pending {
            match repository.update(&remote_id, &patch).await {
                Ok(_) => {
                    self.workspace.lock().await.unpushed.remove(&id);
                    debug!(task_id = %id, "promoted task state copied");
                }
                Err(error) => {
                    warn!(user_id = %self.workspace.user_id(), task_id = %id, %error, "failed to copy promoted task state");
                    report.fail(SyncStep::UpdatePromotedTask, Some(id), &error);
                }
            }
        }
    }

    async fn refresh_tasks(&self, report: &mut SyncReport) {
        let repository = self.workspace.task_repository();
        match self.with_retry(|| repository.fetch_all()).await {
            Ok(tasks) => {
                let mut data = self.workspace.lock().await;
                data.replace_tasks(tasks);
                self.workspace.persist_tasks(&data);
                self.workspace.persist_current_task(&data);
                report.tasks_refreshed = true;
            }
            Err(error) => {
                warn!(user_id = %self.workspace.user_id(), %error, "failed to refresh tasks");
                report.fail(SyncStep::RefreshTasks, None, &error);
            }
        }
    }

    async fn promote_sessions(&self, mapping: &HashMap<Id, Id>, report: &mut SyncReport) {
        let pending: Vec<Session> = {
            let data = self.workspace.lock().await;
            data.sessions
                .iter()
                .filter(|session| session.id.is_local())
                .cloned()
                .collect()
        };

        for session in pending {
            let task_id = mapping.get(&session.task_id).unwrap_or(&session.task_id);
            let remote_task_id = match task_id {
                Id::Remote(value) => value.clone(),
                Id::Local(_) => {
                    debug!(session_id = %session.id, task_id = %task_id, "session waits for its task");
                    report.deferred_sessions += 1;
                    continue;
                }
            };

            let promoted = self
                .workspace
                .session_repository()
                .promote_local(&session, &remote_task_id)
                .await;
            match promoted {
                Ok(promoted) => {
                    let mut data = self.workspace.lock().await;
                    if let Some(slot) = data.sessions.iter_mut().find(|candidate| candidate.id == session.id) {
                        *slot = promoted;
                    }
                    self.workspace.persist_sessions(&data);
                    report.promoted_sessions += 1;
                }
                Err(error) => {
                    warn!(user_id = %self.workspace.user_id(), session_id = %session.id, %error, "failed to promote session");
                    report.fail(SyncStep::PromoteSession, Some(session.id), &error);
                }
            }
        }
    }

    async fn refresh_sessions(&self, report: &mut SyncReport) {
        let repository = self.workspace.session_repository();
        match self.with_retry(|| repository.fetch_all()).await {
            Ok(sessions) => {
                let mut data = self.workspace.lock().await;
                data.replace_sessions(sessions);
                self.workspace.persist_sessions(&data);
                report.sessions_refreshed = true;
            }
            Err(error) => {
                warn!(user_id = %self.workspace.user_id(), %error, "failed to refresh sessions");
                report.fail(SyncStep::RefreshSessions, None, &error);
            }
        }
    }

    async fn finish(&self, report: &mut SyncReport) {
        let now = self.workspace.now();
        report.synced_at = Some(now);
        if let Err(error) = self.workspace.cache().set_last_synced(now) {
            warn!(user_id = %self.workspace.user_id(), %error, "failed to store last synced time");
        }

        let outcome = if report.failures.is_empty() {
            SyncOutcome::Success
        } else {
            SyncOutcome::Failure
        };
        {
            let mut data = self.workspace.lock().await;
            data.last_synced = Some(now);
            data.last_sync_result = Some(LastSyncResult {
                outcome,
                at: now,
                failures: report.failures.len(),
            });
        }

        if outcome == SyncOutcome::Failure {
            self.workspace.notify(Notification::warning(
                "Sync incomplete",
                format!(
                    "{} change(s) could not be synced and will be retried.",
                    report.failures.len()
                ),
            ));
        }
        info!(
            user_id = %self.workspace.user_id(),
            promoted_tasks = report.promoted_tasks,
            promoted_sessions = report.promoted_sessions,
            deferred_sessions = report.deferred_sessions,
            failures = report.failures.len(),
            "sync finished"
        );
    }

    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::RemoteUnavailable(_) => true,
            InfraError::RemoteRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Runs the sync once immediately and then on every period. Stops on drop.
pub struct SyncScheduler {
    task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn spawn(sync: Arc<ReconciliationSync>, period: TokioDuration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = sync.sync_all().await;
                if report.skipped {
                    debug!("scheduled sync coalesced with a running one");
                }
            }
        });
        Self { task: Some(task) }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
