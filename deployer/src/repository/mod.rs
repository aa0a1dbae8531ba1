//! Content-addressable repository interface
//!
//! The engine consumes a repository through [`Repository`]: tags resolve to
//! content hashes, a content hash expands into a directory, and archives are
//! committed under a tag. [`memory::MemoryRepository`] is an in-process
//! implementation.

pub mod memory;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Attribute recording the digest of the archive a tag was committed from
pub const ARCHIVE_DIGEST_ATTRIBUTE: &str = "archive-digest";

/// State of one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub content_hash: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Description of an archive commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSpec {
    /// Server or stage scope, e.g. `server-app-0`
    pub stage: String,
    /// Unit type, e.g. `webapp`
    pub id_type: String,
    /// Unit key within the type, e.g. `default/shop`
    pub id_key: String,
    pub attributes: BTreeMap<String, String>,
    pub message: Option<String>,
}

impl CommitSpec {
    pub fn new(stage: impl Into<String>, id_type: impl Into<String>, id_key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            id_type: id_type.into(),
            id_key: id_key.into(),
            attributes: BTreeMap::new(),
            message: None,
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Tag this commit lands on
    pub fn tag(&self) -> String {
        format!("{}/{}/{}", self.stage, self.id_type, self.id_key)
    }
}

/// Handle returned by [`Repository::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Notified when a tag changes
pub trait TagListener: Send + Sync {
    fn on_tag_change(&self, tag: &str);
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Content hash a tag currently points at
    async fn tag_content_hash(&self, tag: &str) -> Result<Option<String>, DeployError>;

    /// Full tag entry, including attributes
    async fn tag_entry(&self, tag: &str) -> Result<Option<TagEntry>, DeployError>;

    /// All tags starting with `prefix`, sorted
    async fn list_tags(&self, prefix: &str) -> Result<Vec<String>, DeployError>;

    /// Write the tree identified by `hash` below `dir`
    async fn expand_to_path(&self, hash: &str, dir: &Path) -> Result<(), DeployError>;

    /// Store an archive and point the commit's tag at it; returns the content hash
    async fn commit_archive(&self, commit: &CommitSpec, archive: &Path) -> Result<String, DeployError>;

    /// Drop a tag; returns whether it existed
    async fn remove_tag(&self, tag: &str) -> Result<bool, DeployError>;

    /// Listen to tags equal to `tag` or below it at a `/` boundary. The
    /// repository holds the listener weakly.
    fn add_listener(&self, tag: &str, listener: std::sync::Weak<dyn TagListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Convenience for registering an `Arc` listener
pub fn listen(repository: &Arc<dyn Repository>, tag: &str, listener: &Arc<dyn TagListener>) -> ListenerId {
    repository.add_listener(tag, Arc::downgrade(listener))
}
