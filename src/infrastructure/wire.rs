//! JSON shapes exchanged with the remote store and their mapping to domain records.
//!
//! Ids coming off the wire are always remote. Documents carry `_id` and the
//! serializer may add a duplicate `id`; either one is accepted.

use crate::domain::models::{Id, Session, Settings, Task, TaskPatch, TimerState};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub plain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub pomodoros: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub plain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub task_id: String,
    #[serde(default)]
    pub task_title: String,
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateRecord {
    pub time_left: u32,
    #[serde(default)]
    pub is_break: bool,
    #[serde(default)]
    pub is_long_break: bool,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    #[serde(default = "default_work_duration")]
    pub work_duration: u32,
    #[serde(default = "default_break_duration")]
    pub break_duration: u32,
    #[serde(default = "default_long_break_duration")]
    pub long_break_duration: u32,
    #[serde(default = "default_sessions_before_long_break")]
    pub sessions_before_long_break: u32,
    #[serde(default)]
    pub auto_start_breaks: bool,
    #[serde(default)]
    pub auto_start_pomodoros: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest<'a> {
    pub task_id: &'a str,
    pub task_title: &'a str,
    pub duration: u32,
}

#[derive(Debug, Serialize)]
pub struct UpdateTaskRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pomodoros: Option<u32>,
}

impl<'a> From<&'a TaskPatch> for UpdateTaskRequest<'a> {
    fn from(patch: &'a TaskPatch) -> Self {
        Self {
            title: patch.title.as_deref(),
            description: patch.description.as_deref(),
            completed: patch.completed,
            pomodoros: patch.pomodoros,
        }
    }
}

fn default_work_duration() -> u32 {
    Settings::default().work_duration
}

fn default_break_duration() -> u32 {
    Settings::default().break_duration
}

fn default_long_break_duration() -> u32 {
    Settings::default().long_break_duration
}

fn default_sessions_before_long_break() -> u32 {
    Settings::default().sessions_before_long_break
}

fn record_id(mongo_id: Option<&str>, plain_id: Option<&str>, kind: &str) -> Result<Id, InfraError> {
    mongo_id
        .or(plain_id)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Id::remote)
        .ok_or_else(|| InfraError::InvalidResponse(format!("{kind} record did not include _id")))
}

pub fn decode_task(record: TaskRecord, user_id: &str) -> Result<Task, InfraError> {
    let id = record_id(record.mongo_id.as_deref(), record.plain_id.as_deref(), "task")?;
    Ok(Task {
        id,
        user_id: record
            .user_id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string()),
        title: record.title,
        description: record.description,
        completed: record.completed,
        pomodoros: record.pomodoros,
        created_at: record.created_at.unwrap_or_else(Utc::now),
    })
}

pub fn decode_session(record: SessionRecord, user_id: &str) -> Result<Session, InfraError> {
    let id = record_id(record.mongo_id.as_deref(), record.plain_id.as_deref(), "session")?;
    let task_id = record.task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::InvalidResponse(format!(
            "session {id} did not include taskId"
        )));
    }
    Ok(Session {
        id,
        user_id: record
            .user_id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string()),
        task_id: Id::remote(task_id),
        task_title: record.task_title,
        duration: record.duration,
        completed_at: record.completed_at.unwrap_or_else(Utc::now),
    })
}

pub fn decode_timer_state(record: TimerStateRecord) -> TimerState {
    TimerState {
        time_left: record.time_left,
        is_break: record.is_break,
        is_long_break: record.is_long_break,
        session_count: record.session_count,
        updated_at: record.updated_at.unwrap_or_else(Utc::now),
    }
}

pub fn encode_timer_state(state: &TimerState) -> TimerStateRecord {
    TimerStateRecord {
        time_left: state.time_left,
        is_break: state.is_break,
        is_long_break: state.is_long_break,
        session_count: state.session_count,
        updated_at: Some(state.updated_at),
    }
}

pub fn decode_settings(record: SettingsRecord) -> Settings {
    Settings {
        work_duration: record.work_duration,
        break_duration: record.break_duration,
        long_break_duration: record.long_break_duration,
        sessions_before_long_break: record.sessions_before_long_break,
        auto_start_breaks: record.auto_start_breaks,
        auto_start_pomodoros: record.auto_start_pomodoros,
    }
}

pub fn encode_settings(settings: &Settings) -> SettingsRecord {
    SettingsRecord {
        work_duration: settings.work_duration,
        break_duration: settings.break_duration,
        long_break_duration: settings.long_break_duration,
        sessions_before_long_break: settings.sessions_before_long_break,
        auto_start_breaks: settings.auto_start_breaks,
        auto_start_pomodoros: settings.auto_start_pomodoros,
    }
}
