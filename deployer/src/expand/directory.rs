//! Exploded-directory change detector

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::expand::detector::{ChangeDetector, Digest, Scan};
use crate::filesys::dir::{Dir, DirEntryInfo};
use crate::utils::Fingerprint;

/// Scans a directory for exploded deployable units
#[derive(Debug, Clone)]
pub struct DirectoryDetector {
    root: Dir,
    prefix: String,
    suffix: String,
    require_files: Vec<String>,
    /// Relative path of the extraction marker; directories holding it are
    /// expansions owned by the archive or repository sources
    marker: String,
}

impl DirectoryDetector {
    pub fn new(root: Dir, marker: impl Into<String>) -> Self {
        Self {
            root,
            prefix: String::new(),
            suffix: String::new(),
            require_files: Vec::new(),
            marker: marker.into(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_require_files(mut self, files: Vec<String>) -> Self {
        self.require_files = files;
        self
    }

    pub fn root(&self) -> &Dir {
        &self.root
    }

    /// Directory a key expands into
    pub fn expand_dir(&self, key: &str) -> Dir {
        self.root.subdir(&format!("{}{}{}", self.prefix, key, self.suffix))
    }

    /// Map a directory name to its key, if the name is a candidate at all
    pub fn name_to_key<'a>(&self, name: &'a str) -> Option<&'a str> {
        if name.starts_with('.') || name == "WEB-INF" || name == "META-INF" {
            return None;
        }
        if name.len() <= self.prefix.len() + self.suffix.len() {
            return None;
        }
        name.strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
    }

    async fn is_deployable(&self, entry: &DirEntryInfo) -> bool {
        let dir = Dir::new(&entry.path);
        if dir.contains(&self.marker).await {
            return false;
        }
        for required in &self.require_files {
            if !dir.contains(required).await {
                return false;
            }
        }
        true
    }

    async fn candidates(&self) -> Result<Vec<(DirEntryInfo, bool)>, DeployError> {
        let mut result = Vec::new();
        for entry in self.root.entries().await? {
            if !entry.is_dir || self.name_to_key(&entry.name).is_none() {
                continue;
            }
            let deployable = self.is_deployable(&entry).await;
            result.push((entry, deployable));
        }
        Ok(result)
    }
}

#[async_trait]
impl ChangeDetector for DirectoryDetector {
    fn label(&self) -> String {
        format!("directory:{}", self.root.path().display())
    }

    async fn digest(&self) -> Result<Digest, DeployError> {
        let mut fp = Fingerprint::new();
        for entry in self.root.entries().await? {
            fp.update(&entry.name)
                .update_u64(entry.modified)
                .update_u64(entry.len)
                .update([entry.is_dir as u8]);
        }
        // edits below a candidate do not show in the top-level listing
        for (entry, deployable) in self.candidates().await? {
            fp.update(&entry.name).update([deployable as u8]);
            if deployable {
                fp.update_u64(Dir::new(&entry.path).tree_fingerprint().await?);
            }
        }
        Ok(fp.finish())
    }

    async fn scan(&self) -> Result<Scan, DeployError> {
        let digest = self.digest().await?;
        let mut keys = BTreeSet::new();
        for (entry, deployable) in self.candidates().await? {
            if !deployable {
                continue;
            }
            if let Some(key) = self.name_to_key(&entry.name) {
                keys.insert(key.to_string());
            }
        }
        Ok(Scan { digest, keys })
    }
}
