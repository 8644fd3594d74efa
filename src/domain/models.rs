use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TITLE_MAX_CHARS: usize = 100;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Record identifier. `Local` ids are minted on this device and have not been
/// acknowledged by the remote store yet; `Remote` ids were assigned by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Id {
    Local(String),
    Remote(String),
}

impl Id {
    pub fn new_local() -> Self {
        let sequence = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
        Id::Local(format!("{}-{sequence}", Utc::now().timestamp_micros()))
    }

    pub fn remote(value: impl Into<String>) -> Self {
        Id::Remote(value.into())
    }

    pub fn is_local(&self) -> bool {
        match self {
            Id::Local(_) => true,
            Id::Remote(_) => false,
        }
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            Id::Local(_) => None,
            Id::Remote(value) => Some(value),
        }
    }

    /// Inverse of `Display`: `local:` marks a local id, anything else is remote.
    pub fn parse(value: &str) -> Option<Id> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match value.strip_prefix("local:") {
            Some(local) if !local.is_empty() => Some(Id::Local(local.to_string())),
            Some(_) => None,
            None => Some(Id::Remote(value.to_string())),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Local(value) => write!(f, "local:{value}"),
            Id::Remote(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Id,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub pomodoros: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new_local(
        user_id: &str,
        title: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        Ok(Self {
            id: Id::new_local(),
            user_id: user_id.to_string(),
            title: normalize_title(title)?,
            description: description.trim().to_string(),
            completed: false,
            pomodoros: 0,
            created_at: now,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "task.user_id")?;
        normalize_title(&self.title)?;
        Ok(())
    }
}

/// Partial update of a task; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub pomodoros: Option<u32>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.pomodoros.is_none()
    }

    /// Trims and checks the title so the patch can be sent as-is.
    pub fn normalized(mut self) -> Result<Self, String> {
        if let Some(title) = self.title.take() {
            self.title = Some(normalize_title(&title)?);
        }
        if let Some(description) = self.description.take() {
            self.description = Some(description.trim().to_string());
        }
        Ok(self)
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(pomodoros) = self.pomodoros {
            task.pomodoros = pomodoros;
        }
    }
}

/// A completed focus period. Never updated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: Id,
    pub user_id: String,
    pub task_id: Id,
    pub task_title: String,
    pub duration: u32,
    pub completed_at: DateTime<Utc>,
}

impl Session {
    pub fn new_local(task: &Task, duration: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Id::new_local(),
            user_id: task.user_id.clone(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            duration,
            completed_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "session.user_id")?;
        validate_positive(self.duration, "session.duration")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn from_flags(is_break: bool, is_long_break: bool) -> Self {
        match (is_break, is_long_break) {
            (false, _) => Phase::Focus,
            (true, false) => Phase::ShortBreak,
            (true, true) => Phase::LongBreak,
        }
    }

    pub fn is_break(self) -> bool {
        !matches!(self, Phase::Focus)
    }

    pub fn is_long_break(self) -> bool {
        matches!(self, Phase::LongBreak)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Focus => "focus",
            Phase::ShortBreak => "short_break",
            Phase::LongBreak => "long_break",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub work_duration: u32,
    pub break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_before_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_pomodoros: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_duration: 25,
            break_duration: 5,
            long_break_duration: 15,
            sessions_before_long_break: 4,
            auto_start_breaks: false,
            auto_start_pomodoros: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        validate_positive(self.work_duration, "settings.work_duration")?;
        validate_positive(self.break_duration, "settings.break_duration")?;
        validate_positive(self.long_break_duration, "settings.long_break_duration")?;
        if self.sessions_before_long_break < 2 {
            return Err("settings.sessions_before_long_break must be >= 2".to_string());
        }
        Ok(())
    }

    pub fn phase_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.work_duration,
            Phase::ShortBreak => self.break_duration,
            Phase::LongBreak => self.long_break_duration,
        }
    }

    pub fn phase_seconds(&self, phase: Phase) -> u32 {
        self.phase_minutes(phase).saturating_mul(60)
    }
}

/// Persisted countdown position of a user's timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub time_left: u32,
    pub is_break: bool,
    pub is_long_break: bool,
    pub session_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl TimerState {
    pub fn phase(&self) -> Phase {
        Phase::from_flags(self.is_break, self.is_long_break)
    }

    pub fn validate(&self, settings: &Settings) -> Result<(), String> {
        let limit = settings.phase_seconds(self.phase());
        if self.time_left > limit {
            return Err(format!(
                "timer_state.time_left must be <= {limit} for phase {}",
                self.phase().as_str()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

/// Non-blocking message for whatever surface shows toasts to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counts {
    pub tasks: usize,
    pub sessions: usize,
}

pub fn normalize_title(value: &str) -> Result<String, String> {
    let title = value.trim();
    validate_non_empty(title, "task.title")?;
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(format!(
            "task.title cannot be more than {TITLE_MAX_CHARS} characters"
        ));
    }
    Ok(title.to_string())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_positive(value: u32, field_name: &str) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{field_name} must be > 0"));
    }
    Ok(())
}
