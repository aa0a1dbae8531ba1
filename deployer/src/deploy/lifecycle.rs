//! Controller lifecycle state machine

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Lifecycle state of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// Created or explicitly stopped
    Stopped,

    /// Lazily stopped, the next request starts it again
    Idle,

    /// Extraction and instance start in progress
    Starting,

    Active,

    /// Start failed; the error is kept until the next restart
    Error,

    Destroying,

    /// Terminal
    Destroyed,
}

impl ControllerState {
    pub fn is_active(&self) -> bool {
        matches!(self, ControllerState::Active)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ControllerState::Error)
    }

    /// States the strategy never acts on
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControllerState::Starting | ControllerState::Destroying | ControllerState::Destroyed
        )
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, ControllerState::Destroying | ControllerState::Destroyed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Stopped => "stopped",
            ControllerState::Idle => "idle",
            ControllerState::Starting => "starting",
            ControllerState::Active => "active",
            ControllerState::Error => "error",
            ControllerState::Destroying => "destroying",
            ControllerState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event
#[derive(Debug, Clone)]
pub enum LifecycleTransition {
    Start,
    StartSucceeded,
    StartFailed(Arc<DeployError>),
    Stop,
    StopLazy,
    /// Configuration failure outside a start attempt
    Fail(Arc<DeployError>),
    Destroy,
    DestroyCompleted,
}

impl LifecycleTransition {
    fn name(&self) -> &'static str {
        match self {
            LifecycleTransition::Start => "start",
            LifecycleTransition::StartSucceeded => "start-succeeded",
            LifecycleTransition::StartFailed(_) => "start-failed",
            LifecycleTransition::Stop => "stop",
            LifecycleTransition::StopLazy => "stop-lazy",
            LifecycleTransition::Fail(_) => "fail",
            LifecycleTransition::Destroy => "destroy",
            LifecycleTransition::DestroyCompleted => "destroy-completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ControllerState,
    error: Option<Arc<DeployError>>,
    changed_at: DateTime<Utc>,
}

impl Lifecycle {
    /// Create a new lifecycle in the stopped state
    pub fn new() -> Self {
        Self {
            state: ControllerState::Stopped,
            error: None,
            changed_at: Utc::now(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn error(&self) -> Option<Arc<DeployError>> {
        self.error.clone()
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: LifecycleTransition) -> Result<ControllerState, DeployError> {
        use ControllerState::*;

        let new_state = match (self.state, &event) {
            (Stopped | Idle, LifecycleTransition::Start) => {
                self.error = None;
                Starting
            }

            (Starting, LifecycleTransition::StartSucceeded) => Active,
            (Starting, LifecycleTransition::StartFailed(err)) => {
                self.error = Some(err.clone());
                Error
            }

            (Active | Error | Idle, LifecycleTransition::Stop) => Stopped,
            (Active | Stopped, LifecycleTransition::StopLazy) => Idle,

            (Stopped | Idle | Active | Error, LifecycleTransition::Fail(err)) => {
                self.error = Some(err.clone());
                Error
            }

            (Stopped | Idle | Active | Error, LifecycleTransition::Destroy) => Destroying,
            (Destroying, LifecycleTransition::DestroyCompleted) => Destroyed,

            (state, event) => {
                return Err(DeployError::InvalidTransition {
                    from: state.to_string(),
                    event: event.name().to_string(),
                });
            }
        };

        self.state = new_state;
        self.changed_at = Utc::now();
        Ok(new_state)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
