//! In-process content-addressable repository
//!
//! Trees are stored by the SHA256 of their sorted contents, tags point at
//! trees. Archives are plain tar files. Used by hosts without a cluster
//! store and by the test suite.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::repository::{CommitSpec, ListenerId, Repository, TagEntry, TagListener};
use crate::utils::hex;

/// Relative path -> file contents
pub type Tree = BTreeMap<String, Vec<u8>>;

struct Listener {
    id: ListenerId,
    tag: String,
    listener: Weak<dyn TagListener>,
}

#[derive(Default)]
pub struct MemoryRepository {
    trees: RwLock<HashMap<String, Arc<Tree>>>,
    tags: RwLock<BTreeMap<String, TagEntry>>,
    listeners: RwLock<Vec<Listener>>,
    next_listener: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content hash of a tree
    pub fn tree_hash(tree: &Tree) -> String {
        let mut hasher = Sha256::new();
        for (path, contents) in tree {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(contents);
        }
        hex::encode(hasher.finalize())
    }

    /// Store a tree; storing the same contents twice is a no-op
    pub fn put_tree(&self, tree: Tree) -> Result<String, DeployError> {
        for path in tree.keys() {
            safe_relative_path(path)?;
        }
        let hash = Self::tree_hash(&tree);
        let mut trees = self.trees.write().unwrap_or_else(|e| e.into_inner());
        trees.entry(hash.clone()).or_insert_with(|| Arc::new(tree));
        Ok(hash)
    }

    /// Point a tag at a stored tree and notify listeners
    pub fn set_tag(&self, tag: &str, entry: TagEntry) -> Result<(), DeployError> {
        {
            let trees = self.trees.read().unwrap_or_else(|e| e.into_inner());
            if !trees.contains_key(&entry.content_hash) {
                return Err(DeployError::RepositoryError(format!(
                    "unknown content hash '{}' for tag '{}'",
                    entry.content_hash, tag
                )));
            }
        }
        {
            let mut tags = self.tags.write().unwrap_or_else(|e| e.into_inner());
            if tags.get(tag) == Some(&entry) {
                return Ok(());
            }
            tags.insert(tag.to_string(), entry);
        }
        self.notify(tag);
        Ok(())
    }

    /// Store a tree and tag it in one step (cluster-style deployment)
    pub fn deploy_tree(&self, tag: &str, tree: Tree) -> Result<String, DeployError> {
        let hash = self.put_tree(tree)?;
        self.set_tag(
            tag,
            TagEntry {
                content_hash: hash.clone(),
                attributes: BTreeMap::new(),
                message: None,
            },
        )?;
        Ok(hash)
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        let removed = self
            .tags
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tag)
            .is_some();
        if removed {
            self.notify(tag);
        }
        removed
    }

    fn tree(&self, hash: &str) -> Result<Arc<Tree>, DeployError> {
        let trees = self.trees.read().unwrap_or_else(|e| e.into_inner());
        trees
            .get(hash)
            .cloned()
            .ok_or_else(|| DeployError::RepositoryError(format!("unknown content hash '{hash}'")))
    }

    fn notify(&self, tag: &str) {
        let targets: Vec<Arc<dyn TagListener>> = {
            let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|l| l.listener.strong_count() > 0);
            listeners
                .iter()
                .filter(|l| is_tag_below(tag, &l.tag))
                .filter_map(|l| l.listener.upgrade())
                .collect()
        };

        debug!(tag = %tag, listeners = targets.len(), "tag changed");
        for listener in targets {
            listener.on_tag_change(tag);
        }
    }
}

/// `tag` equals `prefix` or lies below it at a `/` boundary
fn is_tag_below(tag: &str, prefix: &str) -> bool {
    match tag.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn tag_content_hash(&self, tag: &str) -> Result<Option<String>, DeployError> {
        let tags = self.tags.read().unwrap_or_else(|e| e.into_inner());
        Ok(tags.get(tag).map(|entry| entry.content_hash.clone()))
    }

    async fn tag_entry(&self, tag: &str) -> Result<Option<TagEntry>, DeployError> {
        let tags = self.tags.read().unwrap_or_else(|e| e.into_inner());
        Ok(tags.get(tag).cloned())
    }

    async fn list_tags(&self, prefix: &str) -> Result<Vec<String>, DeployError> {
        let tags = self.tags.read().unwrap_or_else(|e| e.into_inner());
        Ok(tags
            .range(prefix.to_string()..)
            .take_while(|(tag, _)| tag.starts_with(prefix))
            .map(|(tag, _)| tag.clone())
            .collect())
    }

    async fn expand_to_path(&self, hash: &str, dir: &Path) -> Result<(), DeployError> {
        let tree = self.tree(hash)?;
        let dir = dir.to_owned();
        spawn_blocking(move || write_tree(&tree, &dir)).await?
    }

    async fn commit_archive(&self, commit: &CommitSpec, archive: &Path) -> Result<String, DeployError> {
        let archive_path = archive.to_owned();
        let tree = spawn_blocking(move || read_tar(&archive_path)).await??;
        let hash = self.put_tree(tree)?;

        let tag = commit.tag();
        info!(tag = %tag, hash = %hash, archive = %archive.display(), "committed archive");

        self.set_tag(
            &tag,
            TagEntry {
                content_hash: hash.clone(),
                attributes: commit.attributes.clone(),
                message: commit.message.clone(),
            },
        )?;
        Ok(hash)
    }

    async fn remove_tag(&self, tag: &str) -> Result<bool, DeployError> {
        Ok(MemoryRepository::remove_tag(self, tag))
    }

    fn add_listener(&self, tag: &str, listener: Weak<dyn TagListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(Listener {
            id,
            tag: tag.to_string(),
            listener,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| l.id != id);
    }
}

/// Reject absolute paths and `..` so a tree cannot escape its target directory
fn safe_relative_path(path: &str) -> Result<PathBuf, DeployError> {
    let candidate = Path::new(path);
    let mut result = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            _ => {
                return Err(DeployError::ExtractionError(format!(
                    "path traversal detected in tree entry '{path}'"
                )))
            }
        }
    }
    if result.as_os_str().is_empty() {
        return Err(DeployError::ExtractionError(format!("empty tree entry '{path}'")));
    }
    Ok(result)
}

fn write_tree(tree: &Tree, dir: &Path) -> Result<(), DeployError> {
    std::fs::create_dir_all(dir)?;
    for (path, contents) in tree {
        let target = dir.join(safe_relative_path(path)?);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, contents)?;
    }
    Ok(())
}

fn read_tar(path: &Path) -> Result<Tree, DeployError> {
    let file = std::fs::File::open(path)
        .map_err(|e| DeployError::ExtractionError(format!("cannot open archive {}: {}", path.display(), e)))?;
    let mut archive = tar::Archive::new(file);
    let mut tree = Tree::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path()?.to_string_lossy().into_owned();
        let relative = safe_relative_path(&entry_path)?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        tree.insert(relative.to_string_lossy().replace('\\', "/"), contents);
    }

    Ok(tree)
}

/// Build a tar archive from a tree (test and tooling helper)
pub fn write_tar(tree: &Tree, path: &Path) -> Result<(), DeployError> {
    let file = std::fs::File::create(path)?;
    let mut builder = tar::Builder::new(file);
    for (name, contents) in tree {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_slice())?;
    }
    builder.finish()?;
    Ok(())
}
