use crate::application::debounce::{DebouncedWrite, Debouncer};
use crate::application::session_recorder::SessionRecorder;
use crate::application::sync::{ReconciliationSync, RetryPolicy, SyncReport, SyncScheduler};
use crate::application::task_service::TaskService;
use crate::application::timer_engine::{TimerEngine, TimerEvent};
use crate::application::timer_runner::{TimerHandle, TimerStateSink, TimerStatus};
use crate::application::workspace::{LoadSummary, UserWorkspace};
use crate::domain::models::{Notification, Settings, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{LocalCacheStore, UserCache};
use crate::infrastructure::remote_store::RemoteStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub sync_interval: Duration,
    pub timer_state_debounce: Duration,
    pub retry_policy: RetryPolicy,
    /// Start the periodic sync; it also runs once right away.
    pub background_sync: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            timer_state_debounce: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            background_sync: true,
        }
    }
}

/// Everything that lives for one signed-in user: collections, timer task,
/// periodic sync and the event forwarder.
pub struct UserSession {
    workspace: Arc<UserWorkspace>,
    tasks: TaskService,
    sync: Arc<ReconciliationSync>,
    timer: Mutex<Option<TimerHandle>>,
    scheduler: Mutex<Option<SyncScheduler>>,
    forwarder: JoinHandle<()>,
    notifications: Mutex<mpsc::UnboundedReceiver<Notification>>,
    load_summary: LoadSummary,
}

impl UserSession {
    pub async fn open(
        user_id: &str,
        remote: Arc<dyn RemoteStore>,
        cache_store: Arc<dyn LocalCacheStore>,
        options: SessionOptions,
    ) -> Result<Self, InfraError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(InfraError::Unauthenticated);
        }

        let cache = UserCache::new(cache_store, user_id);
        let (notifier, notifications) = mpsc::unbounded_channel();
        let workspace = Arc::new(UserWorkspace::new(
            user_id,
            Arc::clone(&remote),
            cache.clone(),
            notifier,
        ));
        let load_summary = workspace.load().await;

        let settings = workspace.load_settings().await;
        let engine = match workspace.load_timer_state().await {
            Some(state) => TimerEngine::restore(settings, &state),
            None => TimerEngine::new(settings),
        };
        let sink: Arc<dyn DebouncedWrite<TimerState>> =
            Arc::new(TimerStateSink::new(user_id, cache, remote));
        let debouncer = Debouncer::new(options.timer_state_debounce, sink);
        let (events, event_receiver) = mpsc::unbounded_channel();
        let timer = TimerHandle::spawn(engine, debouncer, events, workspace.now_provider());

        let recorder = Arc::new(SessionRecorder::new(Arc::clone(&workspace)));
        let forwarder = tokio::spawn(forward_timer_events(
            event_receiver,
            Arc::clone(&workspace),
            recorder,
        ));

        let sync = Arc::new(
            ReconciliationSync::new(Arc::clone(&workspace)).with_retry_policy(options.retry_policy),
        );
        let scheduler = options
            .background_sync
            .then(|| SyncScheduler::spawn(Arc::clone(&sync), options.sync_interval));

        info!(user_id, "user session opened");
        Ok(Self {
            tasks: TaskService::new(Arc::clone(&workspace)),
            workspace,
            sync,
            timer: Mutex::new(Some(timer)),
            scheduler: Mutex::new(scheduler),
            forwarder,
            notifications: Mutex::new(notifications),
            load_summary,
        })
    }

    pub fn user_id(&self) -> &str {
        self.workspace.user_id()
    }

    pub fn workspace(&self) -> &Arc<UserWorkspace> {
        &self.workspace
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn load_summary(&self) -> &LoadSummary {
        &self.load_summary
    }

    pub async fn sync_now(&self) -> SyncReport {
        self.sync.sync_all().await
    }

    pub async fn start_timer(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.start().await
    }

    pub async fn pause_timer(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.pause().await
    }

    pub async fn toggle_timer(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.toggle().await
    }

    pub async fn reset_timer(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.reset().await
    }

    pub async fn skip_timer(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.skip().await
    }

    pub async fn timer_status(&self) -> Result<TimerStatus, InfraError> {
        let guard = self.timer.lock().await;
        running(&guard)?.status().await
    }

    /// Validates and applies new settings to the running timer, then stores
    /// them on this device and remotely. A remote failure is only logged.
    pub async fn update_settings(&self, settings: Settings) -> Result<TimerStatus, InfraError> {
        settings.validate().map_err(InfraError::Validation)?;
        let status = {
            let guard = self.timer.lock().await;
            running(&guard)?.apply_settings(settings.clone()).await?
        };

        if let Err(error) = self.workspace.cache().save_settings(&settings) {
            warn!(user_id = %self.user_id(), %error, "failed to cache settings");
        }
        if let Err(error) = self
            .workspace
            .remote()
            .update_settings(self.user_id(), &settings)
            .await
        {
            warn!(user_id = %self.user_id(), %error, "failed to save settings remotely");
            self.workspace.notify(Notification::warning(
                "Saved offline",
                "Settings were saved on this device only.",
            ));
        }
        Ok(status)
    }

    pub async fn drain_notifications(&self) -> Vec<Notification> {
        let mut receiver = self.notifications.lock().await;
        let mut drained = Vec::new();
        while let Ok(notification) = receiver.try_recv() {
            drained.push(notification);
        }
        drained
    }

    pub async fn next_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.recv().await
    }

    /// Stops the periodic sync and the timer. The pending timer snapshot is
    /// flushed before the timer task exits.
    pub async fn close(&self) -> Result<(), InfraError> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
        }
        let timer = self.timer.lock().await.take();
        if let Some(timer) = timer {
            timer.shutdown().await?;
        }
        self.forwarder.abort();
        info!(user_id = %self.user_id(), "user session closed");
        Ok(())
    }
}

impl Drop for UserSession {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn running(timer: &Option<TimerHandle>) -> Result<&TimerHandle, InfraError> {
    timer
        .as_ref()
        .ok_or_else(|| InfraError::Stopped("timer".to_string()))
}

async fn forward_timer_events(
    mut events: mpsc::UnboundedReceiver<TimerEvent>,
    workspace: Arc<UserWorkspace>,
    recorder: Arc<SessionRecorder>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TimerEvent::FocusCompleted { duration_minutes } => {
                let task_id = workspace.current_task_id().await;
                let recorder = Arc::clone(&recorder);
                let workspace = Arc::clone(&workspace);
                tokio::spawn(async move {
                    if let Err(error) = recorder
                        .complete_focus_session(task_id.as_ref(), duration_minutes)
                        .await
                    {
                        warn!(user_id = %workspace.user_id(), %error, "focus session was not recorded");
                        workspace.notify(Notification::error(
                            "Session not recorded",
                            format!("The finished focus session could not be saved: {error}"),
                        ));
                    }
                });
            }
            TimerEvent::BreakCompleted { long_break } => {
                let title = if long_break {
                    "Long break is over"
                } else {
                    "Break is over"
                };
                workspace.notify(Notification::info(title, "Time to focus."));
            }
        }
    }
}
