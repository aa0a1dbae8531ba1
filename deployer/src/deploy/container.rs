//! Registry of live controllers
//!
//! The container asks its generators which names exist, builds one
//! controller per id and keeps it for as long as some generator still
//! offers the name. Registry mutations are serialized; readers get a
//! copy-on-write snapshot of the controller list.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::deploy::controller::DeployController;
use crate::deploy::environment::DeployEnvironment;
use crate::deploy::events::{LifecycleEvent, LifecycleNotifier};
use crate::deploy::generator::{DeployGenerator, ListGenerator};
use crate::deploy::lifecycle::ControllerState;
use crate::deploy::mode::DeployMode;
use crate::errors::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    New,
    Active,
    Stopped,
    Destroyed,
}

pub struct DeployContainer {
    generators: ListGenerator,
    controllers: RwLock<Arc<Vec<Arc<DeployController>>>>,
    /// Serializes registry mutation; holds the names deployed so far
    registry: Mutex<BTreeSet<String>>,
    state: RwLock<ContainerState>,
    notifier: Arc<LifecycleNotifier>,
}

impl DeployContainer {
    pub fn new(env: &DeployEnvironment) -> Self {
        Self {
            generators: ListGenerator::new(),
            controllers: RwLock::new(Arc::new(Vec::new())),
            registry: Mutex::new(BTreeSet::new()),
            state: RwLock::new(ContainerState::New),
            notifier: env.notifier.clone(),
        }
    }

    fn state(&self) -> ContainerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ContainerState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn is_active(&self) -> bool {
        self.state() == ContainerState::Active
    }

    pub fn generators(&self) -> &ListGenerator {
        &self.generators
    }

    /// Snapshot of the registered controllers
    pub fn controllers(&self) -> Arc<Vec<Arc<DeployController>>> {
        self.controllers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &Arc<LifecycleNotifier> {
        &self.notifier
    }

    pub fn find_controller(&self, name: &str) -> Option<Arc<DeployController>> {
        self.controllers()
            .iter()
            .find(|controller| controller.is_name_match(name))
            .cloned()
    }

    pub fn find_controller_by_id(&self, id: &str) -> Option<Arc<DeployController>> {
        self.controllers()
            .iter()
            .find(|controller| controller.id() == id)
            .cloned()
    }

    pub async fn add_generator(&self, generator: Arc<dyn DeployGenerator>) -> Result<(), DeployError> {
        self.generators.add(generator.clone());
        if self.is_active() {
            generator.start().await?;
            self.update().await;
        }
        Ok(())
    }

    pub async fn remove_generator(&self, generator: &Arc<dyn DeployGenerator>) {
        if self.generators.remove(generator) {
            generator.stop().await;
            if self.is_active() {
                self.update().await;
            }
        }
    }

    pub async fn is_modified(&self) -> bool {
        self.generators.is_modified().await
    }

    pub async fn log_modified(&self) -> bool {
        self.generators.log_modified().await
    }

    /// Scan the generators, build the controllers and start them in
    /// ascending startup priority
    pub async fn start(&self) -> Result<(), DeployError> {
        if self.state() != ContainerState::New {
            return Err(DeployError::InvalidState("container already started".to_string()));
        }

        if let Err(e) = self.generators.start().await {
            error!("generator start failed: {}", e);
        }
        self.set_state(ContainerState::Active);

        {
            let mut deployed = self.registry.lock().await;
            let names = self.names().await;
            for name in &names {
                self.update_name(name, false).await;
            }
            *deployed = names;
        }

        let mut controllers: Vec<Arc<DeployController>> = self.controllers().iter().cloned().collect();
        controllers.sort_by_key(|controller| controller.startup_priority());
        for controller in &controllers {
            if let Err(e) = controller.start_on_init().await {
                warn!(id = %controller.id(), "start on init failed: {}", e);
            }
        }

        info!(controllers = controllers.len(), "deploy container started");
        Ok(())
    }

    async fn names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.generators.fill_deployed_names(&mut names).await;
        names
    }

    /// Bring the registry in line with the names the generators offer
    pub async fn update(&self) -> BTreeSet<String> {
        let mut deployed = self.registry.lock().await;
        let names = self.names().await;
        let changed: BTreeSet<String> = deployed.symmetric_difference(&names).cloned().collect();
        for name in &changed {
            self.update_name(name, true).await;
        }
        *deployed = names;
        changed
    }

    /// Re-resolve specific names, e.g. after a generator rescan
    pub async fn update_names(&self, names: &BTreeSet<String>) {
        let mut deployed = self.registry.lock().await;
        let current = self.names().await;
        let names: BTreeSet<String> = names
            .iter()
            .chain(deployed.symmetric_difference(&current))
            .cloned()
            .collect();
        for name in &names {
            self.update_name(name, true).await;
        }
        *deployed = current;
    }

    /// Rescan every generator, including manual ones, and apply the result
    pub async fn update_all(&self) -> Result<BTreeSet<String>, DeployError> {
        let changed = self.generators.update().await?;
        self.update_names(&changed).await;
        Ok(changed)
    }

    // caller holds the registry lock
    async fn update_name(&self, name: &str, start: bool) {
        let existing = self.find_controller(name);
        let candidate = match self.generate_controller(name).await {
            Ok(candidate) => candidate,
            Err(e) => {
                error!(name = %name, "cannot generate controller: {}", e);
                None
            }
        };

        match (existing, candidate) {
            (None, None) => {}
            (Some(old), None) => {
                self.remove_controller(&old).await;
            }
            (existing, Some(candidate)) => {
                if let Some(old) = existing.filter(|old| old.id() != candidate.id()) {
                    self.remove_controller(&old).await;
                }
                let controller = self.add_controller(candidate).await;
                if start && self.is_active() {
                    if let Err(e) = controller.start_on_init().await {
                        warn!(id = %controller.id(), "start on init failed: {}", e);
                    }
                }
            }
        }
    }

    /// Ask every generator for `name`, keep the candidate with the lowest
    /// precedence and merge the others into it
    async fn generate_controller(&self, name: &str) -> Result<Option<DeployController>, DeployError> {
        let mut candidates = Vec::new();
        self.generators.generate_controller(name, &mut candidates).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.controller_type().precedence() < candidates[best].controller_type().precedence() {
                best = i;
            }
        }
        let winner = candidates.swap_remove(best);
        for loser in &candidates {
            winner.merge(loser);
        }
        self.generators.merge_controller(&winner, name).await;

        Ok(Some(winner))
    }

    /// Insert once per id: a candidate for an existing id is merged into the
    /// live controller, which is then updated
    async fn add_controller(&self, candidate: DeployController) -> Arc<DeployController> {
        if let Some(existing) = self.find_controller_by_id(candidate.id()) {
            existing.merge(&candidate);
            if let Err(e) = existing.update().await {
                warn!(id = %existing.id(), "update failed: {}", e);
            }
            return existing;
        }

        let controller = Arc::new(candidate);
        controller.init().await;
        {
            let mut slot = self.controllers.write().unwrap_or_else(|e| e.into_inner());
            let mut next = Vec::clone(&slot);
            next.push(controller.clone());
            *slot = Arc::new(next);
        }
        debug!(id = %controller.id(), name = %controller.name(), "controller added");
        controller
    }

    async fn remove_controller(&self, controller: &Arc<DeployController>) {
        {
            let mut slot = self.controllers.write().unwrap_or_else(|e| e.into_inner());
            let next: Vec<_> = slot
                .iter()
                .filter(|c| !Arc::ptr_eq(*c, controller))
                .cloned()
                .collect();
            *slot = Arc::new(next);
        }
        if let Err(e) = controller.destroy().await {
            warn!(id = %controller.id(), "destroy failed: {}", e);
        }
        if let Err(e) = controller.on_remove().await {
            warn!(id = %controller.id(), "cleanup after removal failed: {}", e);
        }
        info!(id = %controller.id(), name = %controller.name(), "controller removed");
    }

    /// Find the controller for `name`, resolving it from the generators if
    /// it is not registered yet
    async fn resolve(&self, name: &str) -> Option<Arc<DeployController>> {
        if let Some(controller) = self.find_controller(name) {
            return Some(controller);
        }
        self.update().await;
        self.find_controller(name)
    }

    /// Extract the latest content and bring the unit up to date
    pub async fn deploy(&self, name: &str) -> bool {
        let Some(controller) = self.resolve(name).await else {
            return false;
        };
        if let Err(e) = controller.deploy().await {
            warn!(id = %controller.id(), "deploy failed: {}", e);
            return false;
        }
        if let Err(e) = controller.update().await {
            warn!(id = %controller.id(), "update failed: {}", e);
            return false;
        }
        !controller.state().is_error()
    }

    pub async fn start_controller(&self, name: &str) -> bool {
        let Some(controller) = self.resolve(name).await else {
            return false;
        };
        if let Err(e) = controller.start().await {
            warn!(id = %controller.id(), "start failed: {}", e);
        }
        controller.state().is_active()
    }

    pub async fn stop_controller(&self, name: &str) -> bool {
        let Some(controller) = self.find_controller(name) else {
            return false;
        };
        if let Err(e) = controller.stop().await {
            warn!(id = %controller.id(), "stop failed: {}", e);
        }
        controller.state() == ControllerState::Stopped
    }

    /// Stop the unit, remove its archive and expanded content, then drop it
    pub async fn undeploy(&self, name: &str) -> bool {
        let controller = self.find_controller(name);
        if let Some(controller) = &controller {
            if let Err(e) = controller.stop().await {
                warn!(id = %controller.id(), "stop failed: {}", e);
            }
        }

        let removed = match self.generators.remove_artifacts(name).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(name = %name, "cannot remove artifacts: {}", e);
                false
            }
        };

        if let Some(controller) = &controller {
            if let Err(e) = controller.undeploy().await {
                warn!(id = %controller.id(), "undeploy failed: {}", e);
                return false;
            }
        }

        if let Err(e) = self.update_all().await {
            warn!("rescan after undeploy failed: {}", e);
        }
        removed || controller.is_some()
    }

    pub fn config_error(&self, name: &str) -> Option<Arc<DeployError>> {
        self.find_controller(name)
            .and_then(|controller| controller.config_error())
    }

    /// One alarm round. Never fails: errors are logged and swallowed.
    pub async fn alarm(&self) {
        if !self.is_active() {
            return;
        }

        let mut changed = BTreeSet::new();
        for generator in self.generators.generators().iter() {
            if generator.redeploy_mode() != DeployMode::Automatic {
                continue;
            }
            match generator.update_if_modified().await {
                Ok(names) => changed.extend(names),
                Err(e) => warn!(generator = %generator.id(), "generator update failed: {}", e),
            }
        }
        if !changed.is_empty() {
            self.update_names(&changed).await;
        }

        for controller in self.controllers().iter() {
            if let Err(e) = controller.alarm().await {
                warn!(id = %controller.id(), "controller alarm failed: {}", e);
            }
        }
    }

    /// Stop every controller in descending startup priority
    pub async fn stop(&self) {
        if self.state() != ContainerState::Active {
            return;
        }
        self.set_state(ContainerState::Stopped);

        for controller in self.by_descending_priority() {
            if let Err(e) = controller.stop().await {
                warn!(id = %controller.id(), "stop failed: {}", e);
            }
        }
        info!("deploy container stopped");
    }

    /// Stop, then destroy every controller and release the generators
    pub async fn destroy(&self) {
        self.stop().await;
        if self.state() == ContainerState::Destroyed {
            return;
        }
        self.set_state(ContainerState::Destroyed);

        self.generators.stop().await;

        let _registry = self.registry.lock().await;
        let controllers = self.by_descending_priority();
        *self.controllers.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(Vec::new());
        for controller in controllers {
            if let Err(e) = controller.destroy().await {
                warn!(id = %controller.id(), "destroy failed: {}", e);
            }
        }
        info!("deploy container destroyed");
    }

    fn by_descending_priority(&self) -> Vec<Arc<DeployController>> {
        let mut controllers: Vec<Arc<DeployController>> = self.controllers().iter().cloned().collect();
        controllers.sort_by_key(|controller| controller.startup_priority());
        controllers.reverse();
        controllers
    }
}
