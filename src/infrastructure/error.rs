use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Remote store rejected request (http {status}): {message}")]
    RemoteRejected { status: u16, message: String },
    #[error("Invalid remote response: {0}")]
    InvalidResponse(String),
    #[error("No authenticated user")]
    Unauthenticated,
    #[error("{0} is no longer running")]
    Stopped(String),
}

impl InfraError {
    /// Failures of the remote store that callers degrade to local-only operation.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            InfraError::RemoteUnavailable(_)
                | InfraError::RemoteRejected { .. }
                | InfraError::InvalidResponse(_)
        )
    }

    pub fn lock_poisoned(what: &str, error: impl std::fmt::Display) -> Self {
        InfraError::InvalidConfig(format!("{what} lock poisoned: {error}"))
    }
}
