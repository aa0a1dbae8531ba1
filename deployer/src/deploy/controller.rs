//! Lifecycle controller of one deployable unit
//!
//! A controller owns at most one [`DeployInstance`] at a time. Operations are
//! presented to its [`Strategy`], which picks an [`Action`]; the controller
//! performs the action under its operation lock. Failures while extracting,
//! configuring or starting are recorded on the controller and never
//! propagate to the caller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::deploy::environment::DeployEnvironment;
use crate::deploy::events::{LifecycleEventKind, LifecycleNotifier};
use crate::deploy::extract::{ExtractLayout, Extractor};
use crate::deploy::fileset::FileSet;
use crate::deploy::instance::{DeployInstance, ExecutionContext, InstanceFactory};
use crate::deploy::lifecycle::{ControllerState, Lifecycle, LifecycleTransition};
use crate::deploy::mode::{ControllerType, DeployMode};
use crate::deploy::strategy::{Action, Op, Strategy};
use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;
use crate::repository::{listen, ListenerId, Repository, TagListener};

/// Default minimum interval between two alarm-driven modification checks
pub const DEFAULT_REDEPLOY_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default minimum interval between two dependency checks
pub const DEFAULT_DEPENDENCY_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Per-unit configuration. Unset fields can be filled by merging.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub startup_mode: DeployMode,
    pub redeploy_mode: DeployMode,
    pub startup_priority: Option<i32>,
    pub redeploy_check_interval: Option<Duration>,
    pub dependency_check_interval: Option<Duration>,
    pub root_directory: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub cleanup: Option<FileSet>,
    pub controller_type: ControllerType,
    /// Version suffix of the key this unit was built from
    pub version: String,
    pub attributes: BTreeMap<String, String>,
}

impl ControllerConfig {
    pub fn new(root_directory: impl Into<PathBuf>, controller_type: ControllerType) -> Self {
        Self {
            startup_mode: DeployMode::Default,
            redeploy_mode: DeployMode::Default,
            startup_priority: None,
            redeploy_check_interval: None,
            dependency_check_interval: None,
            root_directory: root_directory.into(),
            archive_path: None,
            cleanup: None,
            controller_type,
            version: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_modes(mut self, startup: DeployMode, redeploy: DeployMode) -> Self {
        self.startup_mode = startup;
        self.redeploy_mode = redeploy;
        self
    }

    pub fn with_archive(mut self, archive: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(archive.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.startup_priority = Some(priority);
        self
    }

    pub fn priority(&self) -> i32 {
        self.startup_priority.unwrap_or(0)
    }

    pub fn layout(&self) -> ExtractLayout {
        ExtractLayout {
            root_directory: self.root_directory.clone(),
            archive_path: self.archive_path.clone(),
            cleanup: self.cleanup.clone(),
        }
    }

    /// Fill every unset field from `other`; set fields are kept
    pub fn merge(&mut self, other: &ControllerConfig) {
        if self.startup_mode == DeployMode::Default {
            self.startup_mode = other.startup_mode;
        }
        if self.redeploy_mode == DeployMode::Default {
            self.redeploy_mode = other.redeploy_mode;
        }
        if self.startup_priority.is_none() {
            self.startup_priority = other.startup_priority;
        }
        if self.redeploy_check_interval.is_none() {
            self.redeploy_check_interval = other.redeploy_check_interval;
        }
        if self.dependency_check_interval.is_none() {
            self.dependency_check_interval = other.dependency_check_interval;
        }
        if self.archive_path.is_none() {
            self.archive_path = other.archive_path.clone();
        }
        if self.cleanup.is_none() {
            self.cleanup = other.cleanup.clone();
        }
        if self.version.is_empty() {
            self.version = other.version.clone();
        }
        for (key, value) in &other.attributes {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Set by repository notifications, consumed by the next modification check
#[derive(Default)]
struct TagChangeFlag(AtomicBool);

impl TagListener for TagChangeFlag {
    fn on_tag_change(&self, tag: &str) {
        debug!(tag = %tag, "watched tag changed");
        self.0.store(true, Ordering::Release);
    }
}

pub struct DeployController {
    id: String,
    name: String,
    tag: DeployTag,
    config: RwLock<ControllerConfig>,
    strategy: OnceLock<Strategy>,
    is_init: AtomicBool,
    op_lock: tokio::sync::Mutex<()>,
    lifecycle: RwLock<Lifecycle>,
    instance: RwLock<Option<Arc<dyn DeployInstance>>>,
    config_error: RwLock<Option<Arc<DeployError>>>,
    factory: Arc<dyn InstanceFactory>,
    extractor: Extractor,
    repository: Option<Arc<dyn Repository>>,
    notifier: Arc<LifecycleNotifier>,
    tag_flag: Arc<TagChangeFlag>,
    listeners: Mutex<Vec<ListenerId>>,
    last_alarm: Mutex<Option<Instant>>,
}

impl DeployController {
    /// `name` is the container-facing name, `tag` the repository identity
    pub fn new(
        name: impl Into<String>,
        tag: DeployTag,
        config: ControllerConfig,
        factory: Arc<dyn InstanceFactory>,
        env: &DeployEnvironment,
    ) -> Self {
        let check_interval = config
            .dependency_check_interval
            .unwrap_or(DEFAULT_DEPENDENCY_CHECK_INTERVAL);
        Self {
            id: tag.id(),
            name: name.into(),
            extractor: Extractor::new(env, tag.clone(), check_interval),
            tag,
            config: RwLock::new(config),
            strategy: OnceLock::new(),
            is_init: AtomicBool::new(false),
            op_lock: tokio::sync::Mutex::new(()),
            lifecycle: RwLock::new(Lifecycle::new()),
            instance: RwLock::new(None),
            config_error: RwLock::new(None),
            factory,
            repository: env.repository.clone(),
            notifier: env.notifier.clone(),
            tag_flag: Arc::new(TagChangeFlag::default()),
            listeners: Mutex::new(Vec::new()),
            last_alarm: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &DeployTag {
        &self.tag
    }

    pub fn is_name_match(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn config(&self) -> ControllerConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn controller_type(&self) -> ControllerType {
        self.config.read().unwrap_or_else(|e| e.into_inner()).controller_type
    }

    pub fn startup_priority(&self) -> i32 {
        self.config.read().unwrap_or_else(|e| e.into_inner()).priority()
    }

    pub fn redeploy_mode(&self) -> DeployMode {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .redeploy_mode
            .redeploy()
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy.get().copied()
    }

    pub fn state(&self) -> ControllerState {
        self.lifecycle.read().unwrap_or_else(|e| e.into_inner()).state()
    }

    pub fn is_init(&self) -> bool {
        self.is_init.load(Ordering::Acquire)
    }

    /// Last expanded content hash
    pub fn root_hash(&self) -> Option<String> {
        self.extractor.root_hash()
    }

    /// Current instance, whatever its state
    pub fn instance(&self) -> Option<Arc<dyn DeployInstance>> {
        self.instance.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_instance(&self, instance: Option<Arc<dyn DeployInstance>>) -> Option<Arc<dyn DeployInstance>> {
        let mut slot = self.instance.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, instance)
    }

    /// Last configuration or start error of this unit
    pub fn config_error(&self) -> Option<Arc<DeployError>> {
        if let Some(err) = self.config_error.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Some(err);
        }
        self.instance().and_then(|instance| instance.config_error())
    }

    fn set_config_error(&self, error: Option<Arc<DeployError>>) {
        *self.config_error.write().unwrap_or_else(|e| e.into_inner()) = error;
    }

    fn layout(&self) -> ExtractLayout {
        self.config.read().unwrap_or_else(|e| e.into_inner()).layout()
    }

    fn execution_context(&self) -> ExecutionContext {
        let config = self.config();
        ExecutionContext {
            id: self.id.clone(),
            name: self.name.clone(),
            tag: self.tag.clone(),
            root_directory: config.root_directory,
            version: config.version,
            attributes: config.attributes,
        }
    }

    /// Merge a losing candidate for the same id into this controller
    pub fn merge(&self, other: &DeployController) {
        self.merge_config(&other.config());
    }

    /// Fill unset configuration from generator defaults
    pub fn merge_config(&self, other: &ControllerConfig) {
        self.config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .merge(other);
    }

    /// Select the strategy, read the persisted root hash and register the
    /// tag. Runs once; later calls are no-ops.
    pub async fn init(&self) {
        if self.is_init.swap(true, Ordering::AcqRel) {
            return;
        }

        let config = self.config();
        match Strategy::select(config.startup_mode, config.redeploy_mode) {
            Ok(strategy) => {
                let _ = self.strategy.set(strategy);
            }
            Err(e) => {
                error!(id = %self.id, "invalid deploy configuration: {}", e);
                let e = Arc::new(e);
                self.set_config_error(Some(e.clone()));
                let mut lifecycle = self.lifecycle.write().unwrap_or_else(|e| e.into_inner());
                let _ = lifecycle.process(LifecycleTransition::Fail(e));
            }
        }

        self.extractor.init(&config.layout()).await;
        self.notifier.register_tag(&self.id, self.state());

        if let Some(repository) = &self.repository {
            let listener: Arc<dyn TagListener> = self.tag_flag.clone();
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.push(listen(repository, &self.tag.instance_tag(), &listener));
            listeners.push(listen(repository, &self.extractor.auto_deploy_tag(), &listener));
        }

        debug!(id = %self.id, name = %self.name, "controller initialized");
    }

    /// Container boot hook
    pub async fn start_on_init(&self) -> Result<(), DeployError> {
        self.init().await;
        self.act(Op::StartOnInit).await
    }

    pub async fn start(&self) -> Result<(), DeployError> {
        self.act(Op::Start).await
    }

    pub async fn stop(&self) -> Result<(), DeployError> {
        self.act(Op::Stop).await
    }

    /// Redeploy if needed; never starts a unit the policy keeps stopped
    pub async fn update(&self) -> Result<(), DeployError> {
        self.act(Op::Update).await
    }

    /// Unconditional stop and start; the only way out of `Error` besides update
    pub async fn restart(&self) -> Result<(), DeployError> {
        let _guard = self.op_lock.lock().await;
        if self.state().is_transient() {
            return Ok(());
        }
        self.restart_impl().await
    }

    /// Instance for serving a request, starting it first if the policy allows
    pub async fn request(&self) -> Option<Arc<dyn DeployInstance>> {
        if let Err(e) = self.act(Op::Request).await {
            warn!(id = %self.id, "request handling failed: {}", e);
        }
        self.active_instance()
    }

    /// Like [`Self::request`] but never restarts an active unit
    pub async fn subrequest(&self) -> Option<Arc<dyn DeployInstance>> {
        if let Some(strategy) = self.strategy() {
            let _guard = self.op_lock.lock().await;
            let action = match strategy.decide(Op::Request, self.state()) {
                Action::Start => Action::Start,
                _ => Action::Nothing,
            };
            if let Err(e) = self.perform(action).await {
                warn!(id = %self.id, "subrequest handling failed: {}", e);
            }
        }
        self.active_instance()
    }

    fn active_instance(&self) -> Option<Arc<dyn DeployInstance>> {
        if self.state().is_active() {
            self.instance()
        } else {
            None
        }
    }

    /// Periodic check, throttled by the redeploy check interval
    pub async fn alarm(&self) -> Result<(), DeployError> {
        let interval = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .redeploy_check_interval
            .unwrap_or(DEFAULT_REDEPLOY_CHECK_INTERVAL);
        {
            let mut last = self.last_alarm.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < interval {
                    return Ok(());
                }
            }
            *last = Some(Instant::now());
        }
        self.act(Op::Alarm).await
    }

    /// Extract the current content without starting
    pub async fn deploy(&self) -> Result<bool, DeployError> {
        let _guard = self.op_lock.lock().await;
        self.extractor.extract_application(&self.layout()).await
    }

    /// Wipe the expanded root directory and drop the archive's committed copy
    pub async fn undeploy(&self) -> Result<(), DeployError> {
        let _guard = self.op_lock.lock().await;
        info!(id = %self.id, "undeploying");
        self.extractor.undeploy(&self.layout()).await?;
        self.extractor.remove_auto_deploy_tag().await?;
        Ok(())
    }

    /// Called by the container when the unit disappears from every generator
    pub async fn on_remove(&self) -> Result<(), DeployError> {
        let _guard = self.op_lock.lock().await;
        self.extractor.on_remove(&self.layout()).await
    }

    /// Stop and release everything. Terminal.
    pub async fn destroy(&self) -> Result<(), DeployError> {
        let _guard = self.op_lock.lock().await;
        if self.state().is_destroyed() {
            return Ok(());
        }

        self.stop_impl().await?;
        self.transition(LifecycleTransition::Destroy)?;

        if let Some(instance) = self.set_instance(None) {
            if let Err(e) = instance.destroy().await {
                warn!(id = %self.id, "instance destroy failed: {}", e);
            }
        }

        if let Some(repository) = &self.repository {
            let ids: Vec<ListenerId> = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(|e| e.into_inner()));
            for id in ids {
                repository.remove_listener(id);
            }
        }
        self.notifier.unregister_tag(&self.id);

        self.transition(LifecycleTransition::DestroyCompleted)?;
        debug!(id = %self.id, "controller destroyed");
        Ok(())
    }

    /// Throttled modification check
    pub async fn is_modified(&self) -> bool {
        if self.tag_flag.0.swap(false, Ordering::AcqRel) {
            return self.is_modified_now().await;
        }
        if self.instance().is_some_and(|instance| instance.is_modified()) {
            return true;
        }
        self.extractor.is_modified(&self.layout()).await
    }

    pub async fn is_modified_now(&self) -> bool {
        if self.instance().is_some_and(|instance| instance.is_modified()) {
            return true;
        }
        self.extractor.is_modified_now(&self.layout()).await
    }

    async fn act(&self, op: Op) -> Result<(), DeployError> {
        let Some(strategy) = self.strategy() else {
            debug!(id = %self.id, ?op, "no strategy, ignoring");
            return Ok(());
        };

        let _guard = self.op_lock.lock().await;
        let state = self.state();
        let action = strategy.decide(op, state);
        if action != Action::Nothing {
            debug!(id = %self.id, ?op, %state, ?action, "strategy decision");
        }
        self.perform(action).await
    }

    // caller holds op_lock
    async fn perform(&self, action: Action) -> Result<(), DeployError> {
        match action {
            Action::Nothing => Ok(()),
            Action::Start => self.start_impl().await,
            Action::Stop => self.stop_impl().await,
            Action::StopLazy => self.stop_lazy_impl().await,
            Action::Restart => self.restart_impl().await,
            Action::RestartIfModified => {
                if self.is_modified().await {
                    self.restart_impl().await
                } else {
                    Ok(())
                }
            }
            Action::RestartIfModifiedNow => {
                if self.is_modified_now().await {
                    self.restart_impl().await
                } else {
                    Ok(())
                }
            }
            Action::StopLazyIfModified => {
                if self.is_modified().await {
                    self.stop_lazy_impl().await
                } else {
                    Ok(())
                }
            }
        }
    }

    fn transition(&self, event: LifecycleTransition) -> Result<ControllerState, DeployError> {
        let mut lifecycle = self.lifecycle.write().unwrap_or_else(|e| e.into_inner());
        lifecycle.process(event)
    }

    async fn start_impl(&self) -> Result<(), DeployError> {
        self.transition(LifecycleTransition::Start)?;
        self.set_config_error(None);
        self.notifier.update_tag(&self.id, ControllerState::Starting, None);

        let layout = self.layout();
        let result = self.start_instance(&layout).await;
        // failed starts keep their inputs as baseline too
        self.extractor.add_dependencies(&layout).await;

        match result {
            Ok(()) => {
                self.transition(LifecycleTransition::StartSucceeded)?;
                self.notifier.notify(&self.id, LifecycleEventKind::AfterStart);
                self.notifier.update_tag(&self.id, ControllerState::Active, None);
                info!(id = %self.id, name = %self.name, "deployment active");
            }
            Err(e) => {
                error!(id = %self.id, name = %self.name, "deployment failed to start: {}", e);
                let e = Arc::new(e);
                if let Some(instance) = self.instance() {
                    instance.set_config_error(e.clone());
                }
                self.set_config_error(Some(e.clone()));
                self.transition(LifecycleTransition::StartFailed(e.clone()))?;
                self.notifier.notify(&self.id, LifecycleEventKind::StartFailed);
                self.notifier
                    .update_tag(&self.id, ControllerState::Error, Some(e.to_string()));
            }
        }
        Ok(())
    }

    async fn start_instance(&self, layout: &ExtractLayout) -> Result<(), DeployError> {
        self.extractor.extract_application(layout).await?;

        let ctx = self.execution_context();
        let instance = self.factory.instantiate(&ctx).await?;
        // replaced wholesale; a previous instance was released by stop
        self.set_instance(Some(instance.clone()));

        instance.pre_config_init(&ctx).await?;
        instance.init(&ctx).await?;
        instance.start().await
    }

    async fn stop_impl(&self) -> Result<(), DeployError> {
        let state = self.state();
        match state {
            ControllerState::Active | ControllerState::Error | ControllerState::Idle => {}
            _ => return Ok(()),
        }

        if state.is_active() {
            self.notifier.notify(&self.id, LifecycleEventKind::BeforeStop);
        }
        self.release_instance().await;

        self.transition(LifecycleTransition::Stop)?;
        self.notifier.update_tag(&self.id, ControllerState::Stopped, None);
        info!(id = %self.id, name = %self.name, "deployment stopped");
        Ok(())
    }

    async fn stop_lazy_impl(&self) -> Result<(), DeployError> {
        let state = self.state();
        match state {
            ControllerState::Active => {
                self.notifier.notify(&self.id, LifecycleEventKind::BeforeStop);
                self.release_instance().await;
            }
            ControllerState::Stopped => {}
            _ => return Ok(()),
        }

        self.transition(LifecycleTransition::StopLazy)?;
        self.notifier.update_tag(&self.id, ControllerState::Idle, None);
        debug!(id = %self.id, "deployment idle");
        Ok(())
    }

    async fn restart_impl(&self) -> Result<(), DeployError> {
        self.stop_impl().await?;
        self.start_impl().await
    }

    async fn release_instance(&self) {
        if let Some(instance) = self.set_instance(None) {
            if let Err(e) = instance.stop().await {
                warn!(id = %self.id, "instance stop failed: {}", e);
            }
            if let Err(e) = instance.destroy().await {
                warn!(id = %self.id, "instance destroy failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for DeployController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployController")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
