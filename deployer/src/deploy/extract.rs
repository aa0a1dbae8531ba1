//! Extraction of a unit's content into its root directory
//!
//! Archives are committed into the repository under the server-scoped
//! auto-deploy tag, then the instance tag (or, failing that, the auto-deploy
//! tag) is expanded into the root directory. A marker file below the root
//! records the expanded content hash so the same tree is never expanded
//! twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::deploy::environment::DeployEnvironment;
use crate::deploy::fileset::FileSet;
use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::repository::{CommitSpec, Repository, ARCHIVE_DIGEST_ATTRIBUTE};
use crate::utils::RetryPolicy;

/// Where a unit's content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLayout {
    pub root_directory: PathBuf,
    pub archive_path: Option<PathBuf>,
    /// Files wiped before re-expansion; everything when unset
    pub cleanup: Option<FileSet>,
}

/// Inputs a running unit depends on
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dependencies {
    archive: u64,
    instance_hash: Option<String>,
    auto_deploy_hash: Option<String>,
}

struct DependencyCheck {
    last_check: Option<Instant>,
}

pub struct Extractor {
    repository: Option<Arc<dyn Repository>>,
    tag: DeployTag,
    stage: String,
    marker: String,
    retry: RetryPolicy,
    check_interval: Duration,
    root_hash: Mutex<Option<String>>,
    extract_lock: tokio::sync::Mutex<()>,
    dependencies: RwLock<Option<Dependencies>>,
    modified: AtomicBool,
    checking: tokio::sync::Mutex<DependencyCheck>,
}

impl Extractor {
    pub fn new(env: &DeployEnvironment, tag: DeployTag, check_interval: Duration) -> Self {
        Self {
            repository: env.repository.clone(),
            tag,
            stage: env.stage.clone(),
            marker: env.marker.clone(),
            retry: env.commit_retry.clone(),
            check_interval,
            root_hash: Mutex::new(None),
            extract_lock: tokio::sync::Mutex::new(()),
            dependencies: RwLock::new(None),
            modified: AtomicBool::new(false),
            checking: tokio::sync::Mutex::new(DependencyCheck { last_check: None }),
        }
    }

    pub fn tag(&self) -> &DeployTag {
        &self.tag
    }

    pub fn auto_deploy_tag(&self) -> String {
        self.tag.auto_deploy_tag(&self.stage)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Last expanded content hash
    pub fn root_hash(&self) -> Option<String> {
        self.root_hash.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_root_hash(&self, hash: Option<String>) {
        *self.root_hash.lock().unwrap_or_else(|e| e.into_inner()) = hash;
    }

    fn marker_file(&self, root: &Path) -> File {
        Dir::new(root).file(&self.marker)
    }

    /// Load the persisted root hash
    pub async fn init(&self, layout: &ExtractLayout) {
        let hash = self.marker_file(&layout.root_directory).read_first_line().await;
        debug!(tag = %self.tag, hash = ?hash, "read root hash");
        self.set_root_hash(hash);
    }

    /// Commit, resolve and expand. Returns whether new content was expanded.
    ///
    /// Only configuration errors fail; everything else is logged.
    pub async fn extract_application(&self, layout: &ExtractLayout) -> Result<bool, DeployError> {
        self.commit_archive_with_retry(layout).await;

        let _guard = self.extract_lock.lock().await;
        self.extract_from_repository(layout).await
    }

    /// Best effort: a failed commit is logged and extraction continues
    pub async fn commit_archive_with_retry(&self, layout: &ExtractLayout) -> bool {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.commit_archive(layout).await {
                Ok(()) => return true,
                Err(e) => {
                    if attempt + 1 < attempts {
                        let delay = self.retry.delay(attempt);
                        debug!(tag = %self.tag, "archive commit failed, retrying in {:?}: {}", delay, e);
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(tag = %self.tag, "archive commit failed after {} attempts: {}", attempts, e);
                    }
                }
            }
        }
        false
    }

    async fn commit_archive(&self, layout: &ExtractLayout) -> Result<(), DeployError> {
        let (Some(repository), Some(archive_path)) = (&self.repository, &layout.archive_path) else {
            return Ok(());
        };

        let archive = File::new(archive_path);
        if !archive.exists().await {
            return Ok(());
        }

        let digest = archive.content_digest().await?;
        let tag = self.auto_deploy_tag();

        if let Some(entry) = repository.tag_entry(&tag).await? {
            if entry.attributes.get(ARCHIVE_DIGEST_ATTRIBUTE) == Some(&digest) {
                return Ok(());
            }
        }

        let commit = CommitSpec::new(&self.stage, self.tag.id_type(), self.tag.id_key())
            .attribute(ARCHIVE_DIGEST_ATTRIBUTE, &digest)
            .message(format!("archive added to repository from {}", archive_path.display()));

        info!(tag = %tag, archive = %archive_path.display(), "adding archive to repository");
        repository.commit_archive(&commit, archive_path).await?;
        Ok(())
    }

    async fn extract_from_repository(&self, layout: &ExtractLayout) -> Result<bool, DeployError> {
        let Some(repository) = &self.repository else {
            return Ok(false);
        };

        match self.expand_tag(repository.as_ref(), layout).await {
            Ok(expanded) => Ok(expanded),
            Err(e) if e.is_config() => Err(e),
            Err(e) => {
                warn!(tag = %self.tag, "extraction failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn expand_tag(&self, repository: &dyn Repository, layout: &ExtractLayout) -> Result<bool, DeployError> {
        let mut tag = self.tag.instance_tag();
        let mut hash = repository.tag_content_hash(&tag).await?;

        if hash.is_some() {
            if let Some(archive) = &layout.archive_path {
                if File::new(archive).exists().await {
                    return Err(DeployError::ConfigError(format!(
                        "{} cannot be deployed from both an archive {} and cluster deployment",
                        self.tag,
                        archive.display()
                    )));
                }
            }
        } else {
            tag = self.auto_deploy_tag();
            hash = repository.tag_content_hash(&tag).await?;
        }

        let Some(hash) = hash else {
            return Ok(false);
        };

        if self.root_hash().as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }

        let root = Dir::new(&layout.root_directory);
        root.create().await?;
        remove_expand_directory(&layout.root_directory, layout.cleanup.clone()).await?;

        info!(
            tag = %tag,
            root = %layout.root_directory.display(),
            hash = %hash,
            "extracting from repository"
        );
        repository.expand_to_path(&hash, &layout.root_directory).await?;

        self.marker_file(&layout.root_directory).write_line(&hash).await?;
        self.set_root_hash(Some(hash));
        Ok(true)
    }

    /// Wipe the root directory and forget the expanded hash
    pub async fn undeploy(&self, layout: &ExtractLayout) -> Result<(), DeployError> {
        let _guard = self.extract_lock.lock().await;
        if Dir::new(&layout.root_directory).exists().await {
            remove_expand_directory(&layout.root_directory, layout.cleanup.clone()).await?;
        }
        self.set_root_hash(None);
        Ok(())
    }

    /// Drop the copy committed from the archive
    pub async fn remove_auto_deploy_tag(&self) -> Result<bool, DeployError> {
        let Some(repository) = &self.repository else {
            return Ok(false);
        };
        let tag = self.auto_deploy_tag();
        let removed = repository.remove_tag(&tag).await?;
        if removed {
            info!(tag = %tag, "removed auto-deploy tag");
        }
        Ok(removed)
    }

    /// Called when the unit leaves the container: content that came from a
    /// tag which no longer exists is removed
    pub async fn on_remove(&self, layout: &ExtractLayout) -> Result<(), DeployError> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let tree_hash = repository.tag_content_hash(&self.tag.instance_tag()).await?;
        if tree_hash.is_none() && self.root_hash().is_some() {
            self.undeploy(layout).await?;
        }
        Ok(())
    }

    async fn snapshot(&self, layout: &ExtractLayout) -> Dependencies {
        let archive = match &layout.archive_path {
            Some(path) => File::new(path).fingerprint().await,
            None => 0,
        };

        let (instance_hash, auto_deploy_hash) = match &self.repository {
            Some(repository) => {
                let instance = repository
                    .tag_content_hash(&self.tag.instance_tag())
                    .await
                    .unwrap_or_default();
                let auto = repository
                    .tag_content_hash(&self.auto_deploy_tag())
                    .await
                    .unwrap_or_default();
                (instance, auto)
            }
            None => (None, None),
        };

        Dependencies {
            archive,
            instance_hash,
            auto_deploy_hash,
        }
    }

    /// Record the current inputs as the running baseline
    pub async fn add_dependencies(&self, layout: &ExtractLayout) {
        let snapshot = self.snapshot(layout).await;
        *self.dependencies.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
        self.modified.store(false, Ordering::Release);
        self.checking.lock().await.last_check = Some(Instant::now());
    }

    /// Throttled dependency comparison
    pub async fn is_modified(&self, layout: &ExtractLayout) -> bool {
        let Ok(mut state) = self.checking.try_lock() else {
            return self.modified.load(Ordering::Acquire);
        };
        if let Some(last) = state.last_check {
            if last.elapsed() < self.check_interval {
                return self.modified.load(Ordering::Acquire);
            }
        }
        state.last_check = Some(Instant::now());
        self.compare(layout).await
    }

    pub async fn is_modified_now(&self, layout: &ExtractLayout) -> bool {
        let mut state = self.checking.lock().await;
        state.last_check = Some(Instant::now());
        self.compare(layout).await
    }

    async fn compare(&self, layout: &ExtractLayout) -> bool {
        let baseline = self.dependencies.read().unwrap_or_else(|e| e.into_inner()).clone();
        let modified = match baseline {
            Some(baseline) => baseline != self.snapshot(layout).await,
            // never started
            None => true,
        };
        if modified {
            debug!(tag = %self.tag, "dependencies modified");
        }
        self.modified.store(modified, Ordering::Release);
        modified
    }
}

/// Remove everything below `root` matched by `cleanup`. Directories are only
/// removed once empty; the root itself is kept.
pub async fn remove_expand_directory(root: &Path, cleanup: Option<FileSet>) -> Result<(), DeployError> {
    let root = root.to_owned();
    spawn_blocking(move || {
        for entry in WalkDir::new(&root).min_depth(1).contents_first(true).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("cannot walk {}: {}", root.display(), e);
                    continue;
                }
            };

            let relative = match entry.path().strip_prefix(&root) {
                Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if let Some(cleanup) = &cleanup {
                if !cleanup.matches(&relative) {
                    continue;
                }
            }

            let result = if entry.file_type().is_dir() {
                // kept files leave their directory in place
                match std::fs::remove_dir(entry.path()) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                        debug!("keeping directory {}: {}", entry.path().display(), e);
                        Ok(())
                    }
                    _ => Ok(()),
                }
            } else {
                std::fs::remove_file(entry.path())
            };

            if let Err(e) = result {
                warn!("cannot remove {}: {}", entry.path().display(), e);
            }
        }
        Ok::<(), DeployError>(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_expand_directory_honours_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Dir::new(tmp.path());
        root.file("index.html").write_string("a").await.unwrap();
        root.file("WEB-INF/work/cache").write_string("b").await.unwrap();
        root.file("WEB-INF/web.xml").write_string("c").await.unwrap();

        let cleanup = FileSet::new().exclude("WEB-INF/work/**").exclude("WEB-INF/work");
        remove_expand_directory(tmp.path(), Some(cleanup)).await.unwrap();

        assert!(!root.file("index.html").exists().await);
        assert!(!root.file("WEB-INF/web.xml").exists().await);
        assert!(root.file("WEB-INF/work/cache").exists().await);
        assert!(root.exists().await);
    }

    #[tokio::test]
    async fn test_remove_expand_directory_without_cleanup_wipes_all() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Dir::new(tmp.path());
        root.file("a/b/c.txt").write_string("x").await.unwrap();

        remove_expand_directory(tmp.path(), None).await.unwrap();
        assert!(root.entries().await.unwrap().is_empty());
    }
}
