//! Directory operations

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tokio::fs;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::utils::Fingerprint;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub len: u64,
    /// Modification time in nanoseconds since the epoch (0 if unknown)
    pub modified: u64,
}

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List entries sorted by name. A missing directory lists as empty.
    pub async fn entries(&self) -> Result<Vec<DirEntryInfo>, DeployError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // raced with a delete
                Err(_) => continue,
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();

            result.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir: meta.is_dir(),
                len: meta.len(),
                modified,
            });
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Fingerprint of every path, length and mtime below this directory
    pub async fn tree_fingerprint(&self) -> Result<u64, DeployError> {
        let root = self.path.clone();
        let fingerprint = spawn_blocking(move || {
            let mut fp = Fingerprint::new();
            for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
                // entries can vanish mid-walk
                let Ok(entry) = entry else { continue };
                let Ok(meta) = entry.metadata() else { continue };
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or_default();
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                fp.update(relative.to_string_lossy().as_bytes())
                    .update_u64(meta.len())
                    .update_u64(modified);
            }
            fp.finish()
        })
        .await?;
        Ok(fingerprint)
    }

    /// Check whether a relative path (file or directory) exists below this directory
    pub async fn contains(&self, relative: &str) -> bool {
        fs::metadata(self.path.join(relative)).await.is_ok()
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
