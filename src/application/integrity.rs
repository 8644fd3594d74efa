use crate::domain::models::Counts;
use crate::infrastructure::local_cache::{LocalCacheStore, UserCache};
use crate::infrastructure::remote_store::RemoteStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityReport {
    Checked {
        remote: Counts,
        local: Counts,
        is_consistent: bool,
    },
    Failed {
        message: String,
    },
}

/// Read-only comparison of remote and cached collection sizes.
pub struct DataIntegrityChecker {
    remote: Arc<dyn RemoteStore>,
    cache_store: Arc<dyn LocalCacheStore>,
}

impl DataIntegrityChecker {
    pub fn new(remote: Arc<dyn RemoteStore>, cache_store: Arc<dyn LocalCacheStore>) -> Self {
        Self {
            remote,
            cache_store,
        }
    }

    pub async fn check(&self, user_id: &str) -> IntegrityReport {
        let remote = match self.remote.counts(user_id).await {
            Ok(counts) => counts,
            Err(error) => {
                warn!(user_id, %error, "integrity check could not reach remote store");
                return IntegrityReport::Failed {
                    message: error.to_string(),
                };
            }
        };
        let cache = UserCache::new(Arc::clone(&self.cache_store), user_id);
        let local = match cache.counts() {
            Ok(counts) => counts,
            Err(error) => {
                warn!(user_id, %error, "integrity check could not read local cache");
                return IntegrityReport::Failed {
                    message: error.to_string(),
                };
            }
        };

        let is_consistent = remote == local;
        info!(
            user_id,
            remote_tasks = remote.tasks,
            remote_sessions = remote.sessions,
            local_tasks = local.tasks,
            local_sessions = local.sessions,
            is_consistent,
            "integrity check finished"
        );
        IntegrityReport::Checked {
            remote,
            local,
            is_consistent,
        }
    }
}
