//! The deployed application as seen by the engine
//!
//! The engine never interprets what it deploys. It builds one
//! [`DeployInstance`] per start through an [`InstanceFactory`] and drives it
//! through `pre_config_init`, `init`, `start`, `stop` and `destroy`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;

/// Everything an instance needs to know about where it runs
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub id: String,
    pub name: String,
    pub tag: DeployTag,
    pub root_directory: PathBuf,
    /// Version suffix of the deployed key, empty when unversioned
    pub version: String,
    pub attributes: BTreeMap<String, String>,
}

#[async_trait]
pub trait DeployInstance: Send + Sync {
    /// Runs before configuration is applied
    async fn pre_config_init(&self, ctx: &ExecutionContext) -> Result<(), DeployError>;

    async fn init(&self, ctx: &ExecutionContext) -> Result<(), DeployError>;

    async fn start(&self) -> Result<(), DeployError>;

    async fn stop(&self) -> Result<(), DeployError>;

    async fn destroy(&self) -> Result<(), DeployError>;

    fn set_config_error(&self, error: Arc<DeployError>);

    fn config_error(&self) -> Option<Arc<DeployError>>;

    /// Whether the instance's own inputs changed since it started
    fn is_modified(&self) -> bool {
        false
    }
}

/// Builds instances; one call per start
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    async fn instantiate(&self, ctx: &ExecutionContext) -> Result<Arc<dyn DeployInstance>, DeployError>;
}

/// Storage for the last configuration error, shared by instance implementations
#[derive(Debug, Default)]
pub struct ConfigErrorSlot {
    error: RwLock<Option<Arc<DeployError>>>,
}

impl ConfigErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, error: Arc<DeployError>) {
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn get(&self) -> Option<Arc<DeployError>> {
        self.error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_slot() {
        let slot = ConfigErrorSlot::new();
        assert!(slot.get().is_none());

        slot.set(Arc::new(DeployError::ConfigError("bad".to_string())));
        assert!(slot.get().unwrap().is_config());

        slot.clear();
        assert!(slot.get().is_none());
    }
}
