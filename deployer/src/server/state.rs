//! Server state

use std::sync::Arc;

use crate::app::state::ActivityTracker;
use crate::deploy::container::DeployContainer;

/// Server state shared across handlers
pub struct ServerState {
    pub container: Arc<DeployContainer>,
    pub activity_tracker: Arc<ActivityTracker>,
}

impl ServerState {
    pub fn new(container: Arc<DeployContainer>, activity_tracker: Arc<ActivityTracker>) -> Self {
        Self {
            container,
            activity_tracker,
        }
    }
}
