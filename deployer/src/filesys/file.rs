//! File operations

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;

use crate::errors::DeployError;
use crate::utils::{hex, Fingerprint};

const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists and is a regular file
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, DeployError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read the first line, trimmed. `None` if the file is missing or empty.
    pub async fn read_first_line(&self) -> Option<String> {
        let contents = fs::read_to_string(&self.path).await.ok()?;
        contents
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write a single line, replacing any previous contents
    pub async fn write_line(&self, line: &str) -> Result<(), DeployError> {
        self.write_string(&format!("{line}\n")).await
    }

    /// Write string to file
    pub async fn write_string(&self, contents: &str) -> Result<(), DeployError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Cheap change fingerprint from length and modification time.
    ///
    /// A missing file has fingerprint 0.
    pub async fn fingerprint(&self) -> u64 {
        match fs::metadata(&self.path).await {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or_default();
                let mut fp = Fingerprint::new();
                fp.update(self.path.to_string_lossy().as_bytes())
                    .update_u64(meta.len())
                    .update_u64(mtime);
                fp.finish()
            }
            Err(_) => 0,
        }
    }

    /// Content digest (SHA256 over the bytes, first 64 bits as hex), read in chunks
    pub async fn content_digest(&self) -> Result<String, DeployError> {
        let path = self.path.clone();
        spawn_blocking(move || {
            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok::<_, DeployError>(hex::encode(&hasher.finalize()[..8]))
        })
        .await?
    }
}
