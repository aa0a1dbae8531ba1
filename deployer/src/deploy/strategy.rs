//! Startup and redeploy policies as explicit transition tables
//!
//! A [`Strategy`] owns no state besides its two modes. The controller asks it
//! which [`Action`] an operation maps to in the current state and performs
//! that action itself.

use serde::Serialize;

use crate::deploy::lifecycle::ControllerState;
use crate::deploy::mode::DeployMode;
use crate::errors::DeployError;

/// Lifecycle operation presented to the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    StartOnInit,
    Start,
    Stop,
    Update,
    Request,
    Alarm,
}

/// What the controller does in response to an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Nothing,
    Start,
    Stop,
    StopLazy,
    Restart,
    /// Restart when the throttled modification check reports a change
    RestartIfModified,
    /// Restart when an immediate modification check reports a change
    RestartIfModifiedNow,
    StopLazyIfModified,
}

/// Action per stable state; transient states never act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub stopped: Action,
    pub idle: Action,
    pub active: Action,
    pub error: Action,
}

impl Row {
    const fn new(stopped: Action, idle: Action, active: Action, error: Action) -> Self {
        Self {
            stopped,
            idle,
            active,
            error,
        }
    }

    pub fn action(&self, state: ControllerState) -> Action {
        match state {
            ControllerState::Stopped => self.stopped,
            ControllerState::Idle => self.idle,
            ControllerState::Active => self.active,
            ControllerState::Error => self.error,
            ControllerState::Starting | ControllerState::Destroying | ControllerState::Destroyed => {
                Action::Nothing
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTable {
    pub start_on_init: Row,
    pub start: Row,
    pub stop: Row,
    pub update: Row,
    pub request: Row,
    pub alarm: Row,
}

impl TransitionTable {
    pub fn row(&self, op: Op) -> &Row {
        match op {
            Op::StartOnInit => &self.start_on_init,
            Op::Start => &self.start,
            Op::Stop => &self.stop,
            Op::Update => &self.update,
            Op::Request => &self.request,
            Op::Alarm => &self.alarm,
        }
    }
}

use Action::*;

const NOTHING: Row = Row::new(Nothing, Nothing, Nothing, Nothing);
// admin start never clears an error; restart does
const START: Row = Row::new(Start, Start, Nothing, Nothing);
const STOP: Row = Row::new(Nothing, Stop, Stop, Stop);
const UPDATE: Row = Row::new(Start, Start, RestartIfModifiedNow, Restart);
const UPDATE_LAZY: Row = Row::new(Start, Nothing, RestartIfModifiedNow, Restart);
const REQUEST_START_IDLE: Row = Row::new(Nothing, Start, Nothing, Nothing);
const REQUEST_REDEPLOY: Row = Row::new(Nothing, Start, RestartIfModified, Nothing);

/// startup = manual, redeploy = manual
pub const MANUAL_MANUAL: TransitionTable = TransitionTable {
    start_on_init: Row::new(Stop, Stop, Stop, Stop),
    start: START,
    stop: STOP,
    update: UPDATE,
    request: NOTHING,
    alarm: NOTHING,
};

/// startup = automatic, redeploy = manual
pub const AUTOMATIC_MANUAL: TransitionTable = TransitionTable {
    start_on_init: Row::new(Start, Start, Nothing, Nothing),
    start: START,
    stop: STOP,
    update: UPDATE,
    request: REQUEST_START_IDLE,
    alarm: NOTHING,
};

/// startup = automatic, redeploy = automatic
pub const AUTOMATIC_AUTOMATIC: TransitionTable = TransitionTable {
    start_on_init: Row::new(Start, Start, Nothing, Nothing),
    start: START,
    stop: STOP,
    update: UPDATE,
    request: REQUEST_REDEPLOY,
    alarm: Row::new(Nothing, Nothing, RestartIfModified, RestartIfModified),
};

/// startup = lazy, redeploy = manual
pub const LAZY_MANUAL: TransitionTable = TransitionTable {
    start_on_init: Row::new(StopLazy, Nothing, Nothing, Nothing),
    start: START,
    stop: STOP,
    update: UPDATE_LAZY,
    request: REQUEST_START_IDLE,
    alarm: NOTHING,
};

/// startup = lazy, redeploy = automatic
pub const LAZY_AUTOMATIC: TransitionTable = TransitionTable {
    start_on_init: Row::new(StopLazy, Nothing, Nothing, Nothing),
    start: START,
    stop: STOP,
    update: UPDATE_LAZY,
    request: REQUEST_REDEPLOY,
    alarm: Row::new(Nothing, Nothing, StopLazyIfModified, RestartIfModified),
};

/// Policy selected once per controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    startup: DeployMode,
    redeploy: DeployMode,
    table: &'static TransitionTable,
}

impl Strategy {
    /// Select the policy for a mode pair. `Default` resolves to automatic
    /// startup and manual redeploy.
    pub fn select(startup: DeployMode, redeploy: DeployMode) -> Result<Self, DeployError> {
        let startup = startup.startup();
        let redeploy = redeploy.redeploy();

        let table = match (startup, redeploy) {
            (DeployMode::Manual, DeployMode::Manual) => &MANUAL_MANUAL,
            (DeployMode::Manual, _) => {
                return Err(DeployError::ConfigError(format!(
                    "startup-mode 'manual' is incompatible with redeploy-mode '{}'",
                    redeploy
                )))
            }
            (DeployMode::Automatic, DeployMode::Automatic) => &AUTOMATIC_AUTOMATIC,
            (DeployMode::Automatic, DeployMode::Manual) => &AUTOMATIC_MANUAL,
            (DeployMode::Lazy, DeployMode::Automatic) => &LAZY_AUTOMATIC,
            (DeployMode::Lazy, DeployMode::Manual) => &LAZY_MANUAL,
            (_, DeployMode::Lazy) => {
                return Err(DeployError::ConfigError(
                    "redeploy-mode 'lazy' is not supported. Expected: automatic, manual".to_string(),
                ))
            }
            (DeployMode::Default, _) | (_, DeployMode::Default) => {
                return Err(DeployError::Internal("unresolved deploy mode".to_string()))
            }
        };

        Ok(Self {
            startup,
            redeploy,
            table,
        })
    }

    pub fn startup_mode(&self) -> DeployMode {
        self.startup
    }

    pub fn redeploy_mode(&self) -> DeployMode {
        self.redeploy
    }

    pub fn table(&self) -> &'static TransitionTable {
        self.table
    }

    pub fn decide(&self, op: Op, state: ControllerState) -> Action {
        self.table.row(op).action(state)
    }
}
