//! Change detection over one deployment source
//!
//! A [`ChangeDetector`] produces a cheap [`Digest`] of its source and, when
//! asked, a full key scan. [`CachedDetector`] remembers the last scan and
//! throttles digest checks so many concurrent pollers do not hammer the
//! filesystem or repository.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::DeployError;

/// Opaque fingerprint of a change source. Only compared, never interpreted.
pub type Digest = u64;

/// Default minimum interval between two digest checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a full scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub digest: Digest,
    pub keys: BTreeSet<String>,
}

/// One source of deploy keys
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Short label used in logs
    fn label(&self) -> String;

    /// Cheap fingerprint of the source
    async fn digest(&self) -> Result<Digest, DeployError>;

    /// Full rescan producing digest and key set
    async fn scan(&self) -> Result<Scan, DeployError>;
}

struct CheckState {
    last_check: Option<Instant>,
}

/// Wraps a detector with the last known scan and a throttled `is_modified`
pub struct CachedDetector {
    detector: Box<dyn ChangeDetector>,
    check_interval: Duration,
    last_scan: RwLock<Arc<Scan>>,
    is_modified: AtomicBool,
    // held while a digest check is in flight; contenders get the cached answer
    checking: Mutex<CheckState>,
}

impl CachedDetector {
    pub fn new(detector: Box<dyn ChangeDetector>, check_interval: Duration) -> Self {
        Self {
            detector,
            check_interval,
            last_scan: RwLock::new(Arc::new(Scan::default())),
            // nothing scanned yet
            is_modified: AtomicBool::new(true),
            checking: Mutex::new(CheckState { last_check: None }),
        }
    }

    pub fn label(&self) -> String {
        self.detector.label()
    }

    /// Last published scan
    pub fn last_scan(&self) -> Arc<Scan> {
        self.last_scan
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Throttled modification check.
    ///
    /// Returns the last answer when called within the check interval or
    /// while another caller is already checking.
    pub async fn is_modified(&self) -> bool {
        let Ok(mut state) = self.checking.try_lock() else {
            return self.is_modified.load(Ordering::Acquire);
        };

        if let Some(last) = state.last_check {
            if last.elapsed() < self.check_interval {
                return self.is_modified.load(Ordering::Acquire);
            }
        }
        state.last_check = Some(Instant::now());

        self.check_digest().await
    }

    /// Check the digest regardless of the interval
    pub async fn is_modified_now(&self) -> bool {
        let mut state = self.checking.lock().await;
        state.last_check = Some(Instant::now());
        self.check_digest().await
    }

    /// Forget the throttle so the next `is_modified` really checks
    pub async fn invalidate(&self) {
        self.checking.lock().await.last_check = None;
    }

    /// Log which source changed; returns whether it changed
    pub async fn log_modified(&self) -> bool {
        if self.is_modified_now().await {
            info!(source = %self.label(), "deployment source is modified");
            true
        } else {
            false
        }
    }

    /// Rescan the source and publish the new key set
    pub async fn update(&self) -> Result<Arc<Scan>, DeployError> {
        let scan = Arc::new(self.scan().await?);
        self.publish(scan.clone());
        Ok(scan)
    }

    /// Full scan without touching the published state
    pub async fn scan(&self) -> Result<Scan, DeployError> {
        self.detector.scan().await
    }

    /// Make `scan` the known state and clear the modified flag
    pub fn publish(&self, scan: Arc<Scan>) {
        debug!(source = %self.label(), keys = scan.keys.len(), "rescanned deployment source");
        *self.last_scan.write().unwrap_or_else(|e| e.into_inner()) = scan;
        self.is_modified.store(false, Ordering::Release);
    }

    async fn check_digest(&self) -> bool {
        let known = self.last_scan().digest;
        let modified = match self.detector.digest().await {
            Ok(digest) => digest != known || self.is_modified.load(Ordering::Acquire),
            Err(e) => {
                warn!(source = %self.label(), "digest check failed: {}", e);
                false
            }
        };
        self.is_modified.store(modified, Ordering::Release);
        modified
    }
}
