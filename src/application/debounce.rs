use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

#[async_trait]
pub trait DebouncedWrite<T>: Send + Sync {
    async fn write(&self, value: T);
}

/// Deferred writer holding at most one pending value. The write sees the
/// latest value stored when the delay elapses.
pub struct Debouncer<T: Send + 'static> {
    delay: Duration,
    sink: Arc<dyn DebouncedWrite<T>>,
    pending: Arc<Mutex<Option<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: Arc<dyn DebouncedWrite<T>>) -> Self {
        Self {
            delay,
            sink,
            pending: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// Replaces the pending value and restarts the quiet period.
    pub fn schedule(&mut self, value: T) {
        self.store(value);
        self.abort();
        self.spawn();
    }

    /// Replaces the pending value but keeps an already running deadline.
    pub fn refresh(&mut self, value: T) {
        self.store(value);
        if !self.is_pending() {
            self.spawn();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn flush(&mut self) {
        self.abort();
        let value = self.take();
        if let Some(value) = value {
            self.sink.write(value).await;
        }
    }

    pub fn cancel(&mut self) {
        self.abort();
        self.take();
    }

    fn store(&self, value: T) {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn spawn(&mut self) {
        let pending = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let value = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(value) = value {
                sink.write(value).await;
            }
        }));
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.abort();
    }
}
