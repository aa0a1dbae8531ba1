//! Repository-tag change detector

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::expand::detector::{ChangeDetector, Digest, Scan};
use crate::repository::Repository;
use crate::utils::Fingerprint;

/// Watches the tags of one generator.
///
/// Two prefixes are consulted: the cluster-wide `<type>/<generator>/` and the
/// server-scoped auto-deploy `<stage>/<type>/<generator>/`. The key is the tag
/// remainder after the prefix.
pub struct RepositoryDetector {
    repository: Arc<dyn Repository>,
    prefixes: Vec<String>,
}

impl RepositoryDetector {
    pub fn new(repository: Arc<dyn Repository>, stage: &str, id_type: &str, generator_key: &str) -> Self {
        let mut prefixes = vec![format!("{}/{}/", id_type, generator_key)];
        if !stage.is_empty() {
            prefixes.push(format!("{}/{}/{}/", stage, id_type, generator_key));
        }
        Self { repository, prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    async fn collect(&self) -> Result<Scan, DeployError> {
        let mut fp = Fingerprint::new();
        let mut keys = BTreeSet::new();

        for prefix in &self.prefixes {
            for tag in self.repository.list_tags(prefix).await? {
                let Some(key) = tag.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                // nested tags belong to another generator key
                if key.is_empty() || key.contains('/') {
                    continue;
                }
                let hash = self.repository.tag_content_hash(&tag).await?;
                fp.update(&tag).update(hash.as_deref().unwrap_or(""));
                if hash.is_some() {
                    keys.insert(key.to_string());
                }
            }
        }

        Ok(Scan {
            digest: fp.finish(),
            keys,
        })
    }
}

#[async_trait]
impl ChangeDetector for RepositoryDetector {
    fn label(&self) -> String {
        format!("repository:{}", self.prefixes.join(","))
    }

    async fn digest(&self) -> Result<Digest, DeployError> {
        Ok(self.collect().await?.digest)
    }

    async fn scan(&self) -> Result<Scan, DeployError> {
        self.collect().await
    }
}
