use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const ENV_API_BASE_URL: &str = "POMOSYNC_API_BASE_URL";
pub const ENV_ACCESS_TOKEN: &str = "POMOSYNC_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "POMOSYNC_USER_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub user_id: Option<String>,
    pub sync_interval_seconds: u64,
    pub timer_state_debounce_millis: u64,
    pub request_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            access_token: None,
            user_id: None,
            sync_interval_seconds: 300,
            timer_state_debounce_millis: 1000,
            request_timeout_seconds: 10,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl AppConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn timer_state_debounce(&self) -> Duration {
        Duration::from_millis(self.timer_state_debounce_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), InfraError> {
        if self.sync_interval_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "syncIntervalSeconds must be > 0".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "requestTimeoutSeconds must be > 0".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(InfraError::InvalidConfig(
                "retryMaxAttempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment values win over app.json. Blank values are ignored.
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(base_url) = read(ENV_API_BASE_URL) {
            self.api_base_url = Some(base_url);
        }
        if let Some(token) = read(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(user_id) = read(ENV_USER_ID) {
            self.user_id = Some(user_id);
        }
        self
    }
}

fn default_app_json() -> serde_json::Value {
    let defaults = AppConfig::default();
    serde_json::json!({
        "schema": SUPPORTED_SCHEMA,
        "apiBaseUrl": defaults.api_base_url,
        "syncIntervalSeconds": defaults.sync_interval_seconds,
        "timerStateDebounceMillis": defaults.timer_state_debounce_millis,
        "requestTimeoutSeconds": defaults.request_timeout_seconds,
        "retryMaxAttempts": defaults.retry_max_attempts,
        "retryBaseDelayMs": defaults.retry_base_delay_ms
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_u64(app: &serde_json::Value, key: &str, default: u64) -> Result<u64, InfraError> {
    match app.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| InfraError::InvalidConfig(format!("{key} must be a non-negative integer"))),
    }
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let defaults = AppConfig::default();
    let retry_max_attempts = read_u64(&app, "retryMaxAttempts", u64::from(defaults.retry_max_attempts))?;
    let config = AppConfig {
        api_base_url: app
            .get("apiBaseUrl")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        access_token: None,
        user_id: None,
        sync_interval_seconds: read_u64(&app, "syncIntervalSeconds", defaults.sync_interval_seconds)?,
        timer_state_debounce_millis: read_u64(
            &app,
            "timerStateDebounceMillis",
            defaults.timer_state_debounce_millis,
        )?,
        request_timeout_seconds: read_u64(
            &app,
            "requestTimeoutSeconds",
            defaults.request_timeout_seconds,
        )?,
        retry_max_attempts: u32::try_from(retry_max_attempts).map_err(|_| {
            InfraError::InvalidConfig("retryMaxAttempts is out of range".to_string())
        })?,
        retry_base_delay_ms: read_u64(&app, "retryBaseDelayMs", defaults.retry_base_delay_ms)?,
    };
    config.validate()?;
    Ok(config)
}

pub fn load_configs<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(load_app_config(config_dir)?.apply_env_overrides(lookup))
}

pub fn load_configs_from_env(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_configs(config_dir, |key| std::env::var(key).ok())
}
