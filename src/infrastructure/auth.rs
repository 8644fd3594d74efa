use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Authentication collaborator. Only the identity of the signed-in user is
/// consumed here; credentials are handled elsewhere.
pub trait AuthProvider: Send + Sync {
    fn current_user_id(&self) -> Result<Option<String>, InfraError>;
    fn sign_in(&self, user_id: &str) -> Result<(), InfraError>;
    fn sign_out(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Default)]
pub struct StaticAuthProvider {
    user_id: Mutex<Option<String>>,
}

impl StaticAuthProvider {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let user_id = Some(user_id.trim().to_string()).filter(|value| !value.is_empty());
        Self {
            user_id: Mutex::new(user_id),
        }
    }
}

impl AuthProvider for StaticAuthProvider {
    fn current_user_id(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .user_id
            .lock()
            .map_err(|error| InfraError::lock_poisoned("auth provider", error))?;
        Ok(guard.clone())
    }

    fn sign_in(&self, user_id: &str) -> Result<(), InfraError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(InfraError::Validation("user_id must not be empty".to_string()));
        }
        let mut guard = self
            .user_id
            .lock()
            .map_err(|error| InfraError::lock_poisoned("auth provider", error))?;
        *guard = Some(user_id.to_string());
        Ok(())
    }

    fn sign_out(&self) -> Result<(), InfraError> {
        let mut guard = self
            .user_id
            .lock()
            .map_err(|error| InfraError::lock_poisoned("auth provider", error))?;
        *guard = None;
        Ok(())
    }
}
