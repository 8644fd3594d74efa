use crate::domain::models::{Counts, Id, Session, Settings, Task, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const TASKS_KEY: &str = "tasks";
const SESSIONS_KEY: &str = "sessions";
const TIMER_STATE_KEY: &str = "timer-state";
const SETTINGS_KEY: &str = "settings";
const CURRENT_TASK_KEY: &str = "current-task-id";
const LAST_SYNCED_KEY: &str = "last-synced";

/// Durable string key/value store on this device. Never talks to the network.
pub trait LocalCacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteLocalCache {
    db_path: PathBuf,
}

impl SqliteLocalCache {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl LocalCacheStore for SqliteLocalCache {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT cache_value FROM local_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO local_cache (cache_key, cache_value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(cache_key) DO UPDATE SET
               cache_value = excluded.cache_value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM local_cache WHERE cache_key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocalCache {
    entries: Mutex<HashMap<String, String>>,
}

impl LocalCacheStore for InMemoryLocalCache {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::lock_poisoned("local cache", error))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::lock_poisoned("local cache", error))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::lock_poisoned("local cache", error))?;
        entries.remove(key);
        Ok(())
    }
}

/// Typed view of the cache scoped to one user by the `pomodoro-{userId}-` prefix.
#[derive(Clone)]
pub struct UserCache {
    store: Arc<dyn LocalCacheStore>,
    prefix: String,
}

impl UserCache {
    pub fn new(store: Arc<dyn LocalCacheStore>, user_id: &str) -> Self {
        Self {
            store,
            prefix: format!("pomodoro-{}-", user_id.trim()),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, InfraError> {
        let Some(raw) = self.store.get(&self.key(name))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), InfraError> {
        let payload = serde_json::to_string(value)?;
        self.store.set(&self.key(name), &payload)
    }

    pub fn load_tasks(&self) -> Result<Option<Vec<Task>>, InfraError> {
        self.read_json(TASKS_KEY)
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> Result<(), InfraError> {
        self.write_json(TASKS_KEY, tasks)
    }

    pub fn load_sessions(&self) -> Result<Option<Vec<Session>>, InfraError> {
        self.read_json(SESSIONS_KEY)
    }

    pub fn save_sessions(&self, sessions: &[Session]) -> Result<(), InfraError> {
        self.write_json(SESSIONS_KEY, sessions)
    }

    pub fn load_timer_state(&self) -> Result<Option<TimerState>, InfraError> {
        self.read_json(TIMER_STATE_KEY)
    }

    pub fn save_timer_state(&self, state: &TimerState) -> Result<(), InfraError> {
        self.write_json(TIMER_STATE_KEY, state)
    }

    pub fn load_settings(&self) -> Result<Option<Settings>, InfraError> {
        self.read_json(SETTINGS_KEY)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), InfraError> {
        self.write_json(SETTINGS_KEY, settings)
    }

    pub fn current_task_id(&self) -> Result<Option<Id>, InfraError> {
        self.read_json(CURRENT_TASK_KEY)
    }

    pub fn set_current_task_id(&self, task_id: Option<&Id>) -> Result<(), InfraError> {
        match task_id {
            Some(task_id) => self.write_json(CURRENT_TASK_KEY, task_id),
            None => self.store.remove(&self.key(CURRENT_TASK_KEY)),
        }
    }

    pub fn last_synced(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        let Some(raw) = self.store.get(&self.key(LAST_SYNCED_KEY))? else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid {LAST_SYNCED_KEY} value '{raw}': {error}"))
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    pub fn set_last_synced(&self, at: DateTime<Utc>) -> Result<(), InfraError> {
        self.store.set(&self.key(LAST_SYNCED_KEY), &at.to_rfc3339())
    }

    pub fn counts(&self) -> Result<Counts, InfraError> {
        Ok(Counts {
            tasks: self.load_tasks()?.map(|tasks| tasks.len()).unwrap_or(0),
            sessions: self.load_sessions()?.map(|sessions| sessions.len()).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use crate::test_support::{fixed_time, sample_task, TempWorkspace};

    #[test]
    fn sqlite_cache_roundtrips_and_overwrites_values() {
        let workspace = TempWorkspace::new();
        let db_path = workspace.path().join("cache.sqlite");
        initialize_database(&db_path).expect("initialize database");
        let cache = SqliteLocalCache::new(&db_path);

        assert_eq!(cache.get("missing").expect("read missing"), None);
        cache.set("key", "first").expect("write first");
        cache.set("key", "second").expect("overwrite");
        assert_eq!(cache.get("key").expect("read key").as_deref(), Some("second"));
        cache.remove("key").expect("remove key");
        assert_eq!(cache.get("key").expect("read removed"), None);
    }

    #[test]
    fn user_cache_keys_are_scoped_per_user() {
        let store: Arc<dyn LocalCacheStore> = Arc::new(InMemoryLocalCache::default());
        let alice = UserCache::new(Arc::clone(&store), "alice");
        let bob = UserCache::new(Arc::clone(&store), "bob");

        assert_eq!(alice.key("tasks"), "pomodoro-alice-tasks");
        alice
            .save_tasks(&[sample_task("alice", "Write report")])
            .expect("save alice tasks");

        assert_eq!(alice.load_tasks().expect("load alice").map(|tasks| tasks.len()), Some(1));
        assert_eq!(bob.load_tasks().expect("load bob"), None);
        assert_eq!(bob.counts().expect("bob counts"), Counts::default());
    }

    #[test]
    fn user_cache_tracks_pointer_and_last_synced() {
        let cache = UserCache::new(Arc::new(InMemoryLocalCache::default()), "alice");
        let task_id = Id::Local("1700000000-1".to_string());

        cache.set_current_task_id(Some(&task_id)).expect("set pointer");
        assert_eq!(cache.current_task_id().expect("read pointer"), Some(task_id));
        cache.set_current_task_id(None).expect("clear pointer");
        assert_eq!(cache.current_task_id().expect("read cleared pointer"), None);

        let synced_at = fixed_time("2026-02-16T10:00:00Z");
        cache.set_last_synced(synced_at).expect("set last synced");
        assert_eq!(cache.last_synced().expect("read last synced"), Some(synced_at));
    }

    #[test]
    fn corrupt_collection_is_reported_as_error() {
        let store = Arc::new(InMemoryLocalCache::default());
        store.set("pomodoro-alice-sessions", "{not json").expect("seed corrupt value");
        let cache = UserCache::new(store, "alice");
        assert!(matches!(cache.load_sessions(), Err(InfraError::Json(_))));
    }
}
