use crate::application::debounce::{DebouncedWrite, Debouncer};
use crate::application::timer_engine::{TimerEngine, TimerEvent};
use crate::application::workspace::NowProvider;
use crate::domain::models::{Phase, Settings, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::UserCache;
use crate::infrastructure::remote_store::RemoteStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerStatus {
    pub phase: Phase,
    pub running: bool,
    pub state: TimerState,
    pub settings: Settings,
}

#[derive(Debug)]
enum TimerCommand {
    Start,
    Pause,
    Toggle,
    Reset,
    Skip,
    ApplySettings(Settings),
    Status,
    Shutdown,
}

type CommandMessage = (TimerCommand, oneshot::Sender<TimerStatus>);

/// Writes timer snapshots to the device cache first, then to the remote store.
/// Failures are logged and swallowed.
pub struct TimerStateSink {
    user_id: String,
    cache: UserCache,
    remote: Arc<dyn RemoteStore>,
}

impl TimerStateSink {
    pub fn new(user_id: impl Into<String>, cache: UserCache, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            user_id: user_id.into(),
            cache,
            remote,
        }
    }
}

#[async_trait]
impl DebouncedWrite<TimerState> for TimerStateSink {
    async fn write(&self, value: TimerState) {
        if let Err(error) = self.cache.save_timer_state(&value) {
            warn!(user_id = %self.user_id, %error, "failed to cache timer state");
        }
        if let Err(error) = self.remote.update_timer_state(&self.user_id, &value).await {
            warn!(user_id = %self.user_id, %error, "failed to save timer state remotely");
        }
    }
}

/// Handle to the per-user timer task. Dropping it stops the task.
pub struct TimerHandle {
    commands: mpsc::UnboundedSender<CommandMessage>,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn spawn(
        engine: TimerEngine,
        debouncer: Debouncer<TimerState>,
        events: mpsc::UnboundedSender<TimerEvent>,
        now_provider: NowProvider,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let runner = TimerRunner {
            engine,
            debouncer,
            events,
            now_provider,
        };
        let task = tokio::spawn(runner.run(receiver));
        Self {
            commands,
            task: Some(task),
        }
    }

    pub async fn start(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Start).await
    }

    pub async fn pause(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Pause).await
    }

    pub async fn toggle(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Toggle).await
    }

    pub async fn reset(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Reset).await
    }

    pub async fn skip(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Skip).await
    }

    pub async fn apply_settings(&self, settings: Settings) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::ApplySettings(settings)).await
    }

    pub async fn status(&self) -> Result<TimerStatus, InfraError> {
        self.send(TimerCommand::Status).await
    }

    /// Stops the task after a final flush of the pending snapshot.
    pub async fn shutdown(mut self) -> Result<TimerStatus, InfraError> {
        let status = self.send(TimerCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        status
    }

    async fn send(&self, command: TimerCommand) -> Result<TimerStatus, InfraError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send((command, reply))
            .map_err(|_| InfraError::Stopped("timer".to_string()))?;
        response
            .await
            .map_err(|_| InfraError::Stopped("timer".to_string()))
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct TimerRunner {
    engine: TimerEngine,
    debouncer: Debouncer<TimerState>,
    events: mpsc::UnboundedSender<TimerEvent>,
    now_provider: NowProvider,
}

impl TimerRunner {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<CommandMessage>) {
        let mut ticker = interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = commands.recv() => {
                    let Some((command, reply)) = message else {
                        self.debouncer.flush().await;
                        break;
                    };
                    let shutdown = matches!(command, TimerCommand::Shutdown);
                    let was_running = self.engine.is_running();
                    self.handle(command);
                    if !was_running && self.engine.is_running() {
                        ticker.reset();
                    }
                    if shutdown {
                        self.debouncer.flush().await;
                        let _ = reply.send(self.status());
                        break;
                    }
                    let _ = reply.send(self.status());
                }
                _ = ticker.tick(), if self.engine.is_running() => {
                    match self.engine.tick() {
                        Some(event) => {
                            self.emit(event);
                            self.persist();
                        }
                        None => {
                            let snapshot = self.snapshot();
                            self.debouncer.refresh(snapshot);
                        }
                    }
                }
            }
        }
        debug!("timer runner stopped");
    }

    fn handle(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Start => {
                if self.engine.start() {
                    self.persist();
                }
            }
            TimerCommand::Pause => {
                if self.engine.pause() {
                    self.persist();
                }
            }
            TimerCommand::Toggle => {
                self.engine.toggle();
                self.persist();
            }
            TimerCommand::Reset => {
                self.engine.reset();
                self.persist();
            }
            TimerCommand::Skip => {
                let event = self.engine.skip();
                self.emit(event);
                self.persist();
            }
            TimerCommand::ApplySettings(settings) => {
                self.engine.apply_settings(settings);
                self.persist();
            }
            TimerCommand::Status | TimerCommand::Shutdown => {}
        }
    }

    fn emit(&self, event: TimerEvent) {
        info!(
            phase = self.engine.phase().as_str(),
            session_count = self.engine.session_count(),
            ?event,
            "timer phase completed"
        );
        if self.events.send(event).is_err() {
            debug!("timer event dropped without listener");
        }
    }

    fn snapshot(&self) -> TimerState {
        self.engine.snapshot((self.now_provider)())
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        self.debouncer.schedule(snapshot);
    }

    fn status(&self) -> TimerStatus {
        TimerStatus {
            phase: self.engine.phase(),
            running: self.engine.is_running(),
            state: self.snapshot(),
            settings: self.engine.settings().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_cache::InMemoryLocalCache;
    use crate::test_support::FlakyRemoteStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<TimerState>>,
    }

    impl RecordingSink {
        fn writes(&self) -> Vec<TimerState> {
            self.writes.lock().expect("writes lock poisoned").clone()
        }
    }

    #[async_trait]
    impl DebouncedWrite<TimerState> for RecordingSink {
        async fn write(&self, value: TimerState) {
            self.writes.lock().expect("writes lock poisoned").push(value);
        }
    }

    fn short_settings() -> Settings {
        Settings {
            work_duration: 1,
            break_duration: 1,
            long_break_duration: 2,
            sessions_before_long_break: 2,
            auto_start_breaks: false,
            auto_start_pomodoros: false,
        }
    }

    fn spawn_timer(
        settings: Settings,
    ) -> (TimerHandle, mpsc::UnboundedReceiver<TimerEvent>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let writer: Arc<dyn DebouncedWrite<TimerState>> = Arc::clone(&sink) as Arc<dyn DebouncedWrite<TimerState>>;
        let debouncer = Debouncer::new(Duration::from_secs(1), writer);
        let (events, receiver) = mpsc::unbounded_channel();
        let handle = TimerHandle::spawn(
            TimerEngine::new(settings),
            debouncer,
            events,
            Arc::new(Utc::now),
        );
        (handle, receiver, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn running_focus_phase_completes_after_full_countdown() {
        let (timer, mut events, _sink) = spawn_timer(short_settings());
        let started = Instant::now();

        let status = timer.start().await.expect("start timer");
        assert!(status.running);

        let event = events.recv().await.expect("focus event");
        assert_eq!(event, TimerEvent::FocusCompleted { duration_minutes: 1 });
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(61));

        let status = timer.status().await.expect("timer status");
        assert_eq!(status.phase, Phase::ShortBreak);
        assert!(!status.running);
        assert_eq!(status.state.session_count, 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_emits_event_immediately_and_persists_after_quiet_period() {
        let (timer, mut events, sink) = spawn_timer(short_settings());

        let status = timer.skip().await.expect("skip focus");
        assert_eq!(status.phase, Phase::ShortBreak);
        assert!(!status.running);
        assert_eq!(
            events.try_recv().expect("focus event"),
            TimerEvent::FocusCompleted { duration_minutes: 1 }
        );
        assert!(sink.writes().is_empty());

        sleep(Duration::from_millis(1500)).await;
        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].is_break);
        assert_eq!(writes[0].time_left, 60);

        timer.skip().await.expect("skip break");
        assert_eq!(
            events.try_recv().expect("break event"),
            TimerEvent::BreakCompleted { long_break: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn running_timer_persists_periodically() {
        let (timer, _events, sink) = spawn_timer(Settings::default());
        timer.start().await.expect("start timer");

        sleep(Duration::from_millis(3500)).await;
        let writes = sink.writes();
        assert!(writes.len() >= 2, "expected periodic writes, got {}", writes.len());
        assert!(writes.iter().all(|state| !state.is_break));
        let last = writes.last().expect("last write");
        assert!(last.time_left < 25 * 60);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_snapshot() {
        let (timer, _events, sink) = spawn_timer(Settings::default());
        timer.reset().await.expect("reset timer");
        assert!(sink.writes().is_empty());

        let status = timer.shutdown().await.expect("shutdown timer");
        assert!(!status.running);
        assert_eq!(sink.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_settings_change_resizes_countdown() {
        let (timer, _events, _sink) = spawn_timer(Settings::default());
        let mut settings = Settings::default();
        settings.work_duration = 50;

        let status = timer.apply_settings(settings).await.expect("apply settings");
        assert_eq!(status.state.time_left, 50 * 60);
        assert_eq!(status.settings.work_duration, 50);
    }

    #[tokio::test]
    async fn timer_state_sink_caches_even_when_remote_is_down() {
        let cache = UserCache::new(Arc::new(InMemoryLocalCache::default()), "alice");
        let remote = Arc::new(FlakyRemoteStore::default());
        remote.set_offline(true);
        let sink = TimerStateSink::new("alice", cache.clone(), Arc::clone(&remote) as Arc<dyn RemoteStore>);

        let state = TimerEngine::new(Settings::default()).snapshot(Utc::now());
        sink.write(state.clone()).await;

        assert_eq!(cache.load_timer_state().expect("load cached state"), Some(state));
        assert_eq!(remote.timer_state_writes.load(Ordering::SeqCst), 1);
    }
}
