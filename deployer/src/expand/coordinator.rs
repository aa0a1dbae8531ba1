//! Aggregation of change detectors into one versioned key view

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::DeployError;
use crate::expand::detector::CachedDetector;
use crate::expand::version::{resolve, ExpandVersion, VersionGroup};

/// Immutable view of everything the detectors currently see
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandSnapshot {
    pub base_keys: BTreeSet<String>,
    pub keys: BTreeSet<String>,
    pub versions: BTreeMap<String, ExpandVersion>,
    pub groups: BTreeMap<String, VersionGroup>,
}

pub struct ExpansionCoordinator {
    detectors: Vec<CachedDetector>,
    versioning: bool,
    snapshot: RwLock<Arc<ExpandSnapshot>>,
}

impl ExpansionCoordinator {
    /// Detectors are consulted in the given order
    pub fn new(detectors: Vec<CachedDetector>, versioning: bool) -> Self {
        Self {
            detectors,
            versioning,
            snapshot: RwLock::new(Arc::new(ExpandSnapshot::default())),
        }
    }

    pub fn is_versioning(&self) -> bool {
        self.versioning
    }

    pub fn detectors(&self) -> &[CachedDetector] {
        &self.detectors
    }

    pub fn snapshot(&self) -> Arc<ExpandSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True if any detector reports a change; stops at the first one
    pub async fn is_modified(&self) -> bool {
        for detector in &self.detectors {
            if detector.is_modified().await {
                return true;
            }
        }
        false
    }

    /// Unthrottled variant of [`Self::is_modified`]
    pub async fn is_modified_now(&self) -> bool {
        for detector in &self.detectors {
            if detector.is_modified_now().await {
                return true;
            }
        }
        false
    }

    /// Logs every modified source, not only the first
    pub async fn log_modified(&self) -> bool {
        let mut modified = false;
        for detector in &self.detectors {
            modified |= detector.log_modified().await;
        }
        modified
    }

    pub async fn invalidate(&self) {
        for detector in &self.detectors {
            detector.invalidate().await;
        }
    }

    /// Rescan every detector and publish a new snapshot.
    ///
    /// Detector state is committed only after every scan succeeded, so a
    /// failing source leaves all detectors reporting their pending changes.
    pub async fn rescan(&self) -> Result<Arc<ExpandSnapshot>, DeployError> {
        let mut scans = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            scans.push(Arc::new(detector.scan().await?));
        }

        let mut keys = BTreeSet::new();
        for (detector, scan) in self.detectors.iter().zip(scans) {
            keys.extend(scan.keys.iter().cloned());
            detector.publish(scan);
        }

        let resolution = resolve(keys.iter().map(String::as_str), self.versioning);
        let snapshot = Arc::new(ExpandSnapshot {
            base_keys: resolution.base_keys(),
            keys,
            versions: resolution.versions,
            groups: resolution.groups,
        });

        debug!(
            keys = snapshot.keys.len(),
            base_keys = snapshot.base_keys.len(),
            "published expand snapshot"
        );

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        Ok(snapshot)
    }

    pub fn base_key_set(&self) -> BTreeSet<String> {
        self.snapshot().base_keys.clone()
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.snapshot().keys.clone()
    }

    /// Highest version of a base key
    pub fn primary_version(&self, base_key: &str) -> Option<ExpandVersion> {
        self.snapshot()
            .groups
            .get(base_key)
            .map(|group| group.primary().clone())
    }

    pub fn version(&self, key: &str) -> Option<ExpandVersion> {
        self.snapshot().versions.get(key).cloned()
    }
}
