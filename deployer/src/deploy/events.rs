//! Lifecycle notifications
//!
//! Every start, start failure and stop is published on a broadcast channel
//! with a per-notifier sequence number. The notifier also remembers the last
//! known state of every registered tag.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::deploy::lifecycle::ControllerState;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEventKind {
    AfterStart,
    BeforeStop,
    StartFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub controller_id: String,
    pub kind: LifecycleEventKind,
}

/// Last known status of one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStatus {
    pub state: ControllerState,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct LifecycleNotifier {
    sequence: AtomicU64,
    sender: broadcast::Sender<LifecycleEvent>,
    tags: RwLock<BTreeMap<String, TagStatus>>,
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sequence: AtomicU64::new(0),
            sender,
            tags: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns its sequence number
    pub fn notify(&self, controller_id: &str, kind: LifecycleEventKind) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = LifecycleEvent {
            sequence,
            timestamp: Utc::now(),
            controller_id: controller_id.to_string(),
            kind,
        };
        trace!(id = %controller_id, ?kind, sequence, "lifecycle event");
        // no subscribers is fine
        let _ = self.sender.send(event);
        sequence
    }

    pub fn register_tag(&self, tag: &str, state: ControllerState) {
        let mut tags = self.tags.write().unwrap_or_else(|e| e.into_inner());
        tags.entry(tag.to_string()).or_insert_with(|| TagStatus {
            state,
            error: None,
            updated_at: Utc::now(),
        });
    }

    pub fn update_tag(&self, tag: &str, state: ControllerState, error: Option<String>) {
        let mut tags = self.tags.write().unwrap_or_else(|e| e.into_inner());
        tags.insert(
            tag.to_string(),
            TagStatus {
                state,
                error,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn unregister_tag(&self, tag: &str) {
        self.tags.write().unwrap_or_else(|e| e.into_inner()).remove(tag);
    }

    pub fn tag_status(&self, tag: &str) -> Option<TagStatus> {
        self.tags.read().unwrap_or_else(|e| e.into_inner()).get(tag).cloned()
    }

    pub fn tags(&self) -> BTreeMap<String, TagStatus> {
        self.tags.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let notifier = LifecycleNotifier::new();
        let mut rx = notifier.subscribe();

        assert_eq!(notifier.notify("webapp/a", LifecycleEventKind::AfterStart), 1);
        assert_eq!(notifier.notify("webapp/b", LifecycleEventKind::BeforeStop), 2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.controller_id, "webapp/a");
        assert_eq!(first.kind, LifecycleEventKind::AfterStart);
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_tag_registry() {
        let notifier = LifecycleNotifier::new();
        notifier.register_tag("webapp/a", ControllerState::Stopped);
        notifier.register_tag("webapp/a", ControllerState::Active);
        assert_eq!(notifier.tag_status("webapp/a").unwrap().state, ControllerState::Stopped);

        notifier.update_tag("webapp/a", ControllerState::Error, Some("boom".to_string()));
        let status = notifier.tag_status("webapp/a").unwrap();
        assert_eq!(status.state, ControllerState::Error);
        assert_eq!(status.error.as_deref(), Some("boom"));

        notifier.unregister_tag("webapp/a");
        assert!(notifier.tag_status("webapp/a").is_none());
    }
}
