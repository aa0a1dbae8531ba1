//! Generator for one deployment root
//!
//! Units are discovered as exploded directories, archives next to them and
//! repository tags. Keys are grouped by version and every base key becomes
//! one name served by its primary version.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::controller::{ControllerConfig, DeployController};
use crate::deploy::environment::DeployEnvironment;
use crate::deploy::fileset::FileSet;
use crate::deploy::generator::{DeployGenerator, IdentityMapper, NameMapper};
use crate::deploy::instance::InstanceFactory;
use crate::deploy::mode::{ControllerType, DeployMode};
use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;
use crate::expand::archive::ArchiveDetector;
use crate::expand::coordinator::ExpansionCoordinator;
use crate::expand::detector::{CachedDetector, DEFAULT_CHECK_INTERVAL};
use crate::expand::directory::DirectoryDetector;
use crate::expand::repository::RepositoryDetector;
use crate::filesys::dir::Dir;
use crate::repository::{listen, ListenerId, TagListener};

#[derive(Debug, Clone)]
pub struct ExpandGeneratorOptions {
    /// Unit type, e.g. `webapp`
    pub id_type: String,
    /// Generator key inside the type, e.g. `default`
    pub generator_key: String,
    /// Directory holding the exploded units
    pub expand_root: PathBuf,
    /// Directory holding archives; the expand root when unset
    pub archive_root: Option<PathBuf>,
    pub archive_extension: String,
    pub expand_prefix: String,
    pub expand_suffix: String,
    pub require_files: Vec<String>,
    pub versioning: bool,
    pub startup_mode: DeployMode,
    pub redeploy_mode: DeployMode,
    pub startup_priority: Option<i32>,
    /// Minimum interval between two source checks
    pub check_interval: Duration,
    pub redeploy_check_interval: Option<Duration>,
    pub dependency_check_interval: Option<Duration>,
    pub cleanup: Option<FileSet>,
}

impl Default for ExpandGeneratorOptions {
    fn default() -> Self {
        Self {
            id_type: "webapp".to_string(),
            generator_key: "default".to_string(),
            expand_root: PathBuf::from("webapps"),
            archive_root: None,
            archive_extension: ".tar".to_string(),
            expand_prefix: String::new(),
            expand_suffix: String::new(),
            require_files: Vec::new(),
            versioning: false,
            startup_mode: DeployMode::Default,
            redeploy_mode: DeployMode::Default,
            startup_priority: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            redeploy_check_interval: None,
            dependency_check_interval: None,
            cleanup: None,
        }
    }
}

/// Invalidates the source throttle when a watched tag changes
#[derive(Default)]
struct InvalidateFlag(AtomicBool);

impl TagListener for InvalidateFlag {
    fn on_tag_change(&self, _tag: &str) {
        self.0.store(true, Ordering::Release);
    }
}

pub struct ExpandGenerator {
    options: ExpandGeneratorOptions,
    env: DeployEnvironment,
    factory: Arc<dyn InstanceFactory>,
    mapper: Box<dyn NameMapper>,
    directory: DirectoryDetector,
    archive: ArchiveDetector,
    coordinator: ExpansionCoordinator,
    /// name -> primary key currently deployed
    deployed: RwLock<Arc<BTreeMap<String, String>>>,
    invalidate: Arc<InvalidateFlag>,
    listeners: Mutex<Vec<ListenerId>>,
}

impl ExpandGenerator {
    pub fn new(options: ExpandGeneratorOptions, env: DeployEnvironment, factory: Arc<dyn InstanceFactory>) -> Self {
        let directory = DirectoryDetector::new(Dir::new(&options.expand_root), env.marker.clone())
            .with_prefix(options.expand_prefix.clone())
            .with_suffix(options.expand_suffix.clone())
            .with_require_files(options.require_files.clone());
        let archive_root = options
            .archive_root
            .clone()
            .unwrap_or_else(|| options.expand_root.clone());
        let archive = ArchiveDetector::new(Dir::new(archive_root), options.archive_extension.clone());

        let mut detectors = vec![
            CachedDetector::new(Box::new(directory.clone()), options.check_interval),
            CachedDetector::new(Box::new(archive.clone()), options.check_interval),
        ];
        if let Some(repository) = &env.repository {
            detectors.push(CachedDetector::new(
                Box::new(RepositoryDetector::new(
                    repository.clone(),
                    &env.stage,
                    &options.id_type,
                    &options.generator_key,
                )),
                options.check_interval,
            ));
        }
        let coordinator = ExpansionCoordinator::new(detectors, options.versioning);

        Self {
            options,
            env,
            factory,
            mapper: Box::new(IdentityMapper),
            directory,
            archive,
            coordinator,
            deployed: RwLock::new(Arc::new(BTreeMap::new())),
            invalidate: Arc::new(InvalidateFlag::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mapper(mut self, mapper: Box<dyn NameMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn options(&self) -> &ExpandGeneratorOptions {
        &self.options
    }

    pub fn coordinator(&self) -> &ExpansionCoordinator {
        &self.coordinator
    }

    fn deployed(&self) -> Arc<BTreeMap<String, String>> {
        self.deployed.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Primary key currently behind a name
    pub fn deployed_key(&self, name: &str) -> Option<String> {
        self.deployed().get(name).cloned()
    }

    /// Exploded directory of a key
    pub fn expand_path(&self, key: &str) -> PathBuf {
        self.directory.expand_dir(key).path().to_path_buf()
    }

    pub fn archive_path(&self, key: &str) -> PathBuf {
        self.archive.archive_file(key).path().to_path_buf()
    }

    fn tag_for(&self, key: &str) -> DeployTag {
        DeployTag::new(
            self.options.id_type.clone(),
            format!("{}/{}", self.options.generator_key, key),
        )
    }

    /// Generator-level defaults merged into every controller of this root
    fn defaults(&self) -> ControllerConfig {
        let mut config = ControllerConfig::new(&self.options.expand_root, ControllerType::Discovered)
            .with_modes(self.options.startup_mode, self.options.redeploy_mode);
        config.startup_priority = self.options.startup_priority;
        config.redeploy_check_interval = self.options.redeploy_check_interval;
        config.dependency_check_interval = self.options.dependency_check_interval;
        config.cleanup = self.options.cleanup.clone();
        config
    }

    fn register_listeners(&self) {
        let Some(repository) = &self.env.repository else {
            return;
        };
        let listener: Arc<dyn TagListener> = self.invalidate.clone();
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.is_empty() {
            return;
        }
        let prefix = format!("{}/{}/", self.options.id_type, self.options.generator_key);
        listeners.push(listen(repository, &prefix, &listener));
        if !self.env.stage.is_empty() {
            let scoped = format!("{}/{}", self.env.stage, prefix);
            listeners.push(listen(repository, &scoped, &listener));
        }
    }
}

#[async_trait]
impl DeployGenerator for ExpandGenerator {
    fn id(&self) -> String {
        format!(
            "expand:{}/{}:{}",
            self.options.id_type,
            self.options.generator_key,
            self.options.expand_root.display()
        )
    }

    fn redeploy_mode(&self) -> DeployMode {
        self.options.redeploy_mode.redeploy()
    }

    async fn start(&self) -> Result<(), DeployError> {
        Dir::new(&self.options.expand_root).create().await?;
        self.register_listeners();
        let names = self.update().await?;
        info!(generator = %self.id(), units = names.len(), "deployment root scanned");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(repository) = &self.env.repository {
            let ids: Vec<ListenerId> = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(|e| e.into_inner()));
            for id in ids {
                repository.remove_listener(id);
            }
        }
    }

    async fn fill_deployed_names(&self, names: &mut BTreeSet<String>) {
        names.extend(self.deployed().keys().cloned());
    }

    async fn generate_controller(&self, name: &str, out: &mut Vec<DeployController>) -> Result<(), DeployError> {
        let Some(base_key) = self.mapper.name_to_key(name) else {
            return Ok(());
        };
        let Some(primary) = self.coordinator.primary_version(&base_key) else {
            return Ok(());
        };

        let mut config = ControllerConfig::new(self.expand_path(primary.key()), ControllerType::Discovered)
            .with_archive(self.archive_path(primary.key()));
        config.version = primary.version().to_string();
        config.merge(&self.defaults());

        debug!(generator = %self.id(), name = %name, key = %primary.key(), "generated controller");
        out.push(DeployController::new(
            name,
            self.tag_for(primary.key()),
            config,
            self.factory.clone(),
            &self.env,
        ));
        Ok(())
    }

    async fn merge_controller(&self, controller: &DeployController, name: &str) {
        let Some(key) = self.deployed_key(name) else {
            return;
        };
        let mut config = ControllerConfig::new(self.expand_path(&key), ControllerType::Discovered)
            .with_archive(self.archive_path(&key));
        config.merge(&self.defaults());
        controller.merge_config(&config);
    }

    async fn is_modified(&self) -> bool {
        if self.redeploy_mode() == DeployMode::Manual {
            return false;
        }
        if self.invalidate.0.swap(false, Ordering::AcqRel) {
            self.coordinator.invalidate().await;
        }
        self.coordinator.is_modified().await
    }

    async fn log_modified(&self) -> bool {
        self.coordinator.log_modified().await
    }

    async fn update(&self) -> Result<BTreeSet<String>, DeployError> {
        let snapshot = self.coordinator.rescan().await?;
        let next: BTreeMap<String, String> = snapshot
            .groups
            .iter()
            .map(|(base, group)| (self.mapper.key_to_name(base), group.primary().key().to_string()))
            .collect();

        let previous = {
            let mut slot = self.deployed.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *slot, Arc::new(next.clone()))
        };

        let mut changed = BTreeSet::new();
        for (name, key) in previous.iter() {
            if next.get(name) != Some(key) {
                changed.insert(name.clone());
            }
        }
        for name in next.keys() {
            if !previous.contains_key(name) {
                changed.insert(name.clone());
            }
        }

        if !changed.is_empty() {
            debug!(generator = %self.id(), changed = ?changed, "deployment root changed");
        }
        Ok(changed)
    }

    async fn remove_artifacts(&self, name: &str) -> Result<bool, DeployError> {
        let Some(base_key) = self.mapper.name_to_key(name) else {
            return Ok(false);
        };
        let group = self.coordinator.snapshot().groups.get(&base_key).cloned();
        let Some(group) = group else {
            return Ok(false);
        };

        for version in group.members() {
            info!(generator = %self.id(), key = %version.key(), "removing deployment artifacts");
            self.archive.archive_file(version.key()).delete().await?;
            self.directory.expand_dir(version.key()).delete().await?;
        }
        Ok(true)
    }
}
