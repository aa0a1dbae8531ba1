//! Archive-directory change detector

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::expand::detector::{ChangeDetector, Digest, Scan};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::Fingerprint;

/// Scans a directory for archives with one extension
#[derive(Debug, Clone)]
pub struct ArchiveDetector {
    root: Dir,
    extension: String,
}

impl ArchiveDetector {
    /// `extension` includes the leading dot, e.g. `.tar`
    pub fn new(root: Dir, extension: impl Into<String>) -> Self {
        Self {
            root,
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Dir {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Archive file backing a key
    pub fn archive_file(&self, key: &str) -> File {
        self.root.file(&format!("{}{}", key, self.extension))
    }

    fn key_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        if name.starts_with('.') {
            return None;
        }
        name.strip_suffix(self.extension.as_str())
            .filter(|key| !key.is_empty())
    }
}

#[async_trait]
impl ChangeDetector for ArchiveDetector {
    fn label(&self) -> String {
        format!("archive:{}/*{}", self.root.path().display(), self.extension)
    }

    async fn digest(&self) -> Result<Digest, DeployError> {
        let mut fp = Fingerprint::new();
        for entry in self.root.entries().await? {
            if entry.is_dir || self.key_of(&entry.name).is_none() {
                continue;
            }
            fp.update(&entry.name)
                .update_u64(entry.len)
                .update_u64(entry.modified);
        }
        Ok(fp.finish())
    }

    async fn scan(&self) -> Result<Scan, DeployError> {
        let mut fp = Fingerprint::new();
        let mut keys = BTreeSet::new();
        for entry in self.root.entries().await? {
            if entry.is_dir {
                continue;
            }
            let Some(key) = self.key_of(&entry.name) else {
                continue;
            };
            fp.update(&entry.name)
                .update_u64(entry.len)
                .update_u64(entry.modified);
            keys.insert(key.to_string());
        }
        Ok(Scan {
            digest: fp.finish(),
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_matches_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Dir::new(tmp.path());
        root.file("shop.tar").write_string("a").await.unwrap();
        root.file("blog-1.0.tar").write_string("b").await.unwrap();
        root.file("notes.txt").write_string("c").await.unwrap();
        root.file(".tar").write_string("d").await.unwrap();
        root.subdir("dir.tar").create().await.unwrap();

        let detector = ArchiveDetector::new(root, ".tar");
        let scan = detector.scan().await.unwrap();
        let expected: BTreeSet<String> = ["blog-1.0", "shop"].iter().map(|s| s.to_string()).collect();
        assert_eq!(scan.keys, expected);
        assert_eq!(scan.digest, detector.digest().await.unwrap());
    }

    #[tokio::test]
    async fn test_digest_tracks_archive_content() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Dir::new(tmp.path());
        let detector = ArchiveDetector::new(root.clone(), ".tar");
        root.file("shop.tar").write_string("a").await.unwrap();

        let first = detector.digest().await.unwrap();
        assert_eq!(first, detector.digest().await.unwrap());

        root.file("shop.tar").write_string("longer").await.unwrap();
        assert_ne!(first, detector.digest().await.unwrap());
    }
}
