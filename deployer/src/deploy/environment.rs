//! Shared collaborators handed to generators and controllers

use std::sync::Arc;

use crate::deploy::events::LifecycleNotifier;
use crate::repository::Repository;
use crate::utils::RetryPolicy;

/// Relative path of the marker recording the last expanded content hash
pub const DEFAULT_MARKER: &str = "META-INF/deploy.application-hash";

#[derive(Clone)]
pub struct DeployEnvironment {
    pub repository: Option<Arc<dyn Repository>>,
    pub notifier: Arc<LifecycleNotifier>,
    /// Server scope of auto-deploy tags, e.g. `server-app-0`
    pub stage: String,
    pub marker: String,
    pub commit_retry: RetryPolicy,
}

impl DeployEnvironment {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            repository: None,
            notifier: Arc::new(LifecycleNotifier::new()),
            stage: stage.into(),
            marker: DEFAULT_MARKER.to_string(),
            commit_retry: RetryPolicy::default(),
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_commit_retry(mut self, policy: RetryPolicy) -> Self {
        self.commit_retry = policy;
        self
    }
}

impl Default for DeployEnvironment {
    fn default() -> Self {
        Self::new("default")
    }
}
