use crate::domain::models::{Counts, Session, Settings, Task, TaskPatch, TimerState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::wire::{
    decode_session, decode_settings, decode_task, decode_timer_state, encode_settings,
    encode_timer_state, CreateSessionRequest, CreateTaskRequest, SessionRecord, SettingsRecord,
    TaskRecord, TimerStateRecord, UpdateTaskRequest,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Persistence collaborator. Every record is owned by `user_id`; a missing
/// record is `Ok(None)` rather than an error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, InfraError>;

    async fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>, InfraError>;

    async fn create_task(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Task, InfraError>;

    async fn update_task(
        &self,
        user_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError>;

    async fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool, InfraError>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, InfraError>;

    /// Creating a session also increments the task's pomodoro counter server-side.
    async fn create_session(
        &self,
        user_id: &str,
        task_id: &str,
        task_title: &str,
        duration: u32,
    ) -> Result<Session, InfraError>;

    async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, InfraError>;

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &Settings,
    ) -> Result<Settings, InfraError>;

    async fn get_timer_state(&self, user_id: &str) -> Result<Option<TimerState>, InfraError>;

    async fn update_timer_state(
        &self,
        user_id: &str,
        state: &TimerState,
    ) -> Result<TimerState, InfraError>;

    async fn counts(&self, user_id: &str) -> Result<Counts, InfraError> {
        Ok(Counts {
            tasks: self.list_tasks(user_id).await?.len(),
            sessions: self.list_sessions(user_id).await?.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestRemoteStore {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorPayload {
    error: Option<String>,
    message: Option<String>,
}

impl ReqwestRemoteStore {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid api base url '{base_url}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "api base url '{base_url}' cannot be a base"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            base_url,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn rejected(status: StatusCode, body: &str) -> InfraError {
        let message = serde_json::from_str::<ErrorPayload>(body)
            .ok()
            .and_then(|payload| payload.error.or(payload.message))
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("http {}", status.as_u16())
                } else {
                    body.trim().to_string()
                }
            });
        InfraError::RemoteRejected {
            status: status.as_u16(),
            message,
        }
    }

    /// Sends the request and parses the JSON body. A 404 maps to `Ok(None)`.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<Option<T>, InfraError> {
        let response = self
            .authorize(request)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| InfraError::RemoteUnavailable(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::RemoteUnavailable(format!("failed reading response while {action}: {error}")))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::rejected(status, &body));
        }

        let parsed = serde_json::from_str::<T>(&body).map_err(|error| {
            InfraError::InvalidResponse(format!("invalid payload while {action}: {error}; body={body}"))
        })?;
        Ok(Some(parsed))
    }

    async fn expect_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<T, InfraError> {
        self.send_json(request, action)
            .await?
            .ok_or_else(|| InfraError::RemoteRejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("endpoint not found while {action}"),
            })
    }
}

#[async_trait]
impl RemoteStore for ReqwestRemoteStore {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let request = self.client.get(self.endpoint(&["tasks"])?);
        let records: Vec<TaskRecord> = self.expect_json(request, "listing tasks").await?;
        records
            .into_iter()
            .map(|record| decode_task(record, user_id))
            .collect()
    }

    async fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>, InfraError> {
        let request = self.client.get(self.endpoint(&["tasks", task_id])?);
        let record: Option<TaskRecord> = self.send_json(request, "fetching task").await?;
        record.map(|record| decode_task(record, user_id)).transpose()
    }

    async fn create_task(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Task, InfraError> {
        let request = self
            .client
            .post(self.endpoint(&["tasks"])?)
            .json(&CreateTaskRequest { title, description });
        let record: TaskRecord = self.expect_json(request, "creating task").await?;
        decode_task(record, user_id)
    }

    async fn update_task(
        &self,
        user_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError> {
        let request = self
            .client
            .put(self.endpoint(&["tasks", task_id])?)
            .json(&UpdateTaskRequest::from(patch));
        let record: Option<TaskRecord> = self.send_json(request, "updating task").await?;
        record.map(|record| decode_task(record, user_id)).transpose()
    }

    async fn delete_task(&self, _user_id: &str, task_id: &str) -> Result<bool, InfraError> {
        let request = self.client.delete(self.endpoint(&["tasks", task_id])?);
        let response: Option<serde_json::Value> = self.send_json(request, "deleting task").await?;
        Ok(response.is_some())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, InfraError> {
        let request = self.client.get(self.endpoint(&["sessions"])?);
        let records: Vec<SessionRecord> = self.expect_json(request, "listing sessions").await?;
        records
            .into_iter()
            .map(|record| decode_session(record, user_id))
            .collect()
    }

    async fn create_session(
        &self,
        user_id: &str,
        task_id: &str,
        task_title: &str,
        duration: u32,
    ) -> Result<Session, InfraError> {
        let request = self
            .client
            .post(self.endpoint(&["sessions"])?)
            .json(&CreateSessionRequest {
                task_id,
                task_title,
                duration,
            });
        let record: SessionRecord = self.expect_json(request, "creating session").await?;
        decode_session(record, user_id)
    }

    async fn get_settings(&self, _user_id: &str) -> Result<Option<Settings>, InfraError> {
        let request = self.client.get(self.endpoint(&["settings"])?);
        let record: Option<Option<SettingsRecord>> =
            self.send_json(request, "fetching settings").await?;
        Ok(record.flatten().map(decode_settings))
    }

    async fn update_settings(
        &self,
        _user_id: &str,
        settings: &Settings,
    ) -> Result<Settings, InfraError> {
        let request = self
            .client
            .put(self.endpoint(&["settings"])?)
            .json(&encode_settings(settings));
        let record: SettingsRecord = self.expect_json(request, "updating settings").await?;
        Ok(decode_settings(record))
    }

    async fn get_timer_state(&self, _user_id: &str) -> Result<Option<TimerState>, InfraError> {
        let request = self.client.get(self.endpoint(&["timer-state"])?);
        let record: Option<Option<TimerStateRecord>> =
            self.send_json(request, "fetching timer state").await?;
        Ok(record.flatten().map(decode_timer_state))
    }

    async fn update_timer_state(
        &self,
        _user_id: &str,
        state: &TimerState,
    ) -> Result<TimerState, InfraError> {
        let request = self
            .client
            .put(self.endpoint(&["timer-state"])?)
            .json(&encode_timer_state(state));
        let record: TimerStateRecord = self.expect_json(request, "updating timer state").await?;
        Ok(decode_timer_state(record))
    }
}
