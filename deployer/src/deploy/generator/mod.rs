//! Controller generators
//!
//! A generator knows a set of deployable names and builds candidate
//! controllers for them on demand. The container combines all of them
//! through a [`ListGenerator`].

pub mod expand;
pub mod explicit;

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::deploy::controller::DeployController;
use crate::deploy::mode::DeployMode;
use crate::errors::DeployError;

/// Maps keys found by a generator to container names and back
pub trait NameMapper: Send + Sync {
    fn key_to_name(&self, key: &str) -> String;

    fn name_to_key(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl NameMapper for IdentityMapper {
    fn key_to_name(&self, key: &str) -> String {
        key.to_string()
    }

    fn name_to_key(&self, name: &str) -> Option<String> {
        Some(name.to_string())
    }
}

/// Exposes keys below a path prefix, e.g. `shop` as `/shop`
#[derive(Debug, Clone)]
pub struct PrefixMapper {
    prefix: String,
}

impl PrefixMapper {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl NameMapper for PrefixMapper {
    fn key_to_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn name_to_key(&self, name: &str) -> Option<String> {
        name.strip_prefix(self.prefix.as_str())
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
pub trait DeployGenerator: Send + Sync {
    /// Identity used in logs
    fn id(&self) -> String;

    fn redeploy_mode(&self) -> DeployMode;

    /// Initial scan
    async fn start(&self) -> Result<(), DeployError>;

    async fn stop(&self) {}

    /// Add every name this generator can currently deploy
    async fn fill_deployed_names(&self, names: &mut BTreeSet<String>);

    /// Push candidate controllers for `name`, if this generator knows it
    async fn generate_controller(&self, name: &str, out: &mut Vec<DeployController>) -> Result<(), DeployError>;

    /// Apply this generator's defaults to the controller that won `name`
    async fn merge_controller(&self, _controller: &DeployController, _name: &str) {}

    async fn is_modified(&self) -> bool;

    async fn log_modified(&self) -> bool {
        self.is_modified().await
    }

    /// Rescan; returns the names whose deployment changed
    async fn update(&self) -> Result<BTreeSet<String>, DeployError>;

    async fn update_if_modified(&self) -> Result<BTreeSet<String>, DeployError> {
        if self.is_modified().await {
            self.log_modified().await;
            self.update().await
        } else {
            Ok(BTreeSet::new())
        }
    }

    /// Delete the archive and expanded content behind `name`; returns whether
    /// this generator owned it
    async fn remove_artifacts(&self, _name: &str) -> Result<bool, DeployError> {
        Ok(false)
    }
}

/// Ordered set of generators acting as one. Never deduplicates.
#[derive(Default)]
pub struct ListGenerator {
    generators: RwLock<Arc<Vec<Arc<dyn DeployGenerator>>>>,
}

impl ListGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generators(&self) -> Arc<Vec<Arc<dyn DeployGenerator>>> {
        self.generators.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn add(&self, generator: Arc<dyn DeployGenerator>) {
        let mut slot = self.generators.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::clone(&slot);
        next.push(generator);
        *slot = Arc::new(next);
    }

    pub fn remove(&self, generator: &Arc<dyn DeployGenerator>) -> bool {
        let mut slot = self.generators.write().unwrap_or_else(|e| e.into_inner());
        let before = slot.len();
        let next: Vec<_> = slot
            .iter()
            .filter(|g| !Arc::ptr_eq(*g, generator))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *slot = Arc::new(next);
        removed
    }

    pub fn len(&self) -> usize {
        self.generators().len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators().is_empty()
    }
}

#[async_trait]
impl DeployGenerator for ListGenerator {
    fn id(&self) -> String {
        let ids: Vec<String> = self.generators().iter().map(|g| g.id()).collect();
        format!("list[{}]", ids.join(","))
    }

    fn redeploy_mode(&self) -> DeployMode {
        if self
            .generators()
            .iter()
            .any(|g| g.redeploy_mode() == DeployMode::Automatic)
        {
            DeployMode::Automatic
        } else {
            DeployMode::Manual
        }
    }

    async fn start(&self) -> Result<(), DeployError> {
        for generator in self.generators().iter() {
            generator.start().await?;
        }
        Ok(())
    }

    async fn stop(&self) {
        for generator in self.generators().iter() {
            generator.stop().await;
        }
    }

    async fn fill_deployed_names(&self, names: &mut BTreeSet<String>) {
        for generator in self.generators().iter() {
            generator.fill_deployed_names(names).await;
        }
    }

    async fn generate_controller(&self, name: &str, out: &mut Vec<DeployController>) -> Result<(), DeployError> {
        for generator in self.generators().iter() {
            generator.generate_controller(name, out).await?;
        }
        Ok(())
    }

    async fn merge_controller(&self, controller: &DeployController, name: &str) {
        for generator in self.generators().iter() {
            generator.merge_controller(controller, name).await;
        }
    }

    async fn is_modified(&self) -> bool {
        for generator in self.generators().iter() {
            if generator.is_modified().await {
                return true;
            }
        }
        false
    }

    async fn log_modified(&self) -> bool {
        for generator in self.generators().iter() {
            if generator.log_modified().await {
                return true;
            }
        }
        false
    }

    async fn update(&self) -> Result<BTreeSet<String>, DeployError> {
        let mut names = BTreeSet::new();
        for generator in self.generators().iter() {
            names.extend(generator.update().await?);
        }
        Ok(names)
    }

    async fn update_if_modified(&self) -> Result<BTreeSet<String>, DeployError> {
        let mut names = BTreeSet::new();
        for generator in self.generators().iter() {
            names.extend(generator.update_if_modified().await?);
        }
        Ok(names)
    }

    async fn remove_artifacts(&self, name: &str) -> Result<bool, DeployError> {
        let mut removed = false;
        for generator in self.generators().iter() {
            removed |= generator.remove_artifacts(name).await?;
        }
        Ok(removed)
    }
}
