//! Test doubles shared by the integration tests

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use hotdeploy::deploy::instance::{ConfigErrorSlot, DeployInstance, ExecutionContext, InstanceFactory};
use hotdeploy::errors::DeployError;
use hotdeploy::repository::memory::{MemoryRepository, Tree};
use hotdeploy::repository::{CommitSpec, ListenerId, Repository, TagEntry, TagListener};

pub fn tree(entries: &[(&str, &str)]) -> Tree {
    entries
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.as_bytes().to_vec()))
        .collect::<BTreeMap<_, _>>()
}

/// Appends `<event>:<name>` for every instance call
#[derive(Default)]
pub struct RecordingFactory {
    log: Arc<Mutex<Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    instantiated: AtomicUsize,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `start` fail for instances named `name`
    pub fn fail(&self, name: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Log entries for one event kind, e.g. `start`
    pub fn events(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}:", kind);
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl InstanceFactory for RecordingFactory {
    async fn instantiate(&self, ctx: &ExecutionContext) -> Result<Arc<dyn DeployInstance>, DeployError> {
        self.instantiated.fetch_add(1, Ordering::SeqCst);
        let fail_start = self.failing.lock().unwrap().contains(&ctx.name);
        Ok(Arc::new(RecordingInstance {
            name: ctx.name.clone(),
            log: self.log.clone(),
            fail_start,
            errors: ConfigErrorSlot::new(),
        }))
    }
}

pub struct RecordingInstance {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail_start: bool,
    errors: ConfigErrorSlot,
}

impl RecordingInstance {
    fn record(&self, event: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl DeployInstance for RecordingInstance {
    async fn pre_config_init(&self, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        Ok(())
    }

    async fn init(&self, _ctx: &ExecutionContext) -> Result<(), DeployError> {
        self.record("init");
        Ok(())
    }

    async fn start(&self) -> Result<(), DeployError> {
        if self.fail_start {
            self.record("failed");
            return Err(DeployError::InstanceError(format!("{} refused to start", self.name)));
        }
        self.record("start");
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeployError> {
        self.record("stop");
        Ok(())
    }

    async fn destroy(&self) -> Result<(), DeployError> {
        self.record("destroy");
        Ok(())
    }

    fn set_config_error(&self, error: Arc<DeployError>) {
        self.errors.set(error);
    }

    fn config_error(&self) -> Option<Arc<DeployError>> {
        self.errors.get()
    }
}

/// [`MemoryRepository`] that counts expansions and commits
#[derive(Default)]
pub struct CountingRepository {
    pub inner: MemoryRepository,
    expands: AtomicUsize,
    commits: AtomicUsize,
    failing_commits: AtomicUsize,
}

impl CountingRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn expands(&self) -> usize {
        self.expands.load(Ordering::SeqCst)
    }

    /// Commit attempts, failed ones included
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next `n` commits fail
    pub fn fail_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for CountingRepository {
    async fn tag_content_hash(&self, tag: &str) -> Result<Option<String>, DeployError> {
        self.inner.tag_content_hash(tag).await
    }

    async fn tag_entry(&self, tag: &str) -> Result<Option<TagEntry>, DeployError> {
        self.inner.tag_entry(tag).await
    }

    async fn list_tags(&self, prefix: &str) -> Result<Vec<String>, DeployError> {
        self.inner.list_tags(prefix).await
    }

    async fn expand_to_path(&self, hash: &str, dir: &Path) -> Result<(), DeployError> {
        self.expands.fetch_add(1, Ordering::SeqCst);
        self.inner.expand_to_path(hash, dir).await
    }

    async fn commit_archive(&self, commit: &CommitSpec, archive: &Path) -> Result<String, DeployError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeployError::RepositoryError("repository unavailable".to_string()));
        }
        self.inner.commit_archive(commit, archive).await
    }

    async fn remove_tag(&self, tag: &str) -> Result<bool, DeployError> {
        Repository::remove_tag(&self.inner, tag).await
    }

    fn add_listener(&self, tag: &str, listener: Weak<dyn TagListener>) -> ListenerId {
        self.inner.add_listener(tag, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.remove_listener(id)
    }
}
