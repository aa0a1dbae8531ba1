//! Deploy modes and controller origin

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Startup or redeploy policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Startup: automatic. Redeploy: manual.
    #[default]
    Default,
    Automatic,
    Lazy,
    Manual,
}

impl DeployMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Default => "default",
            DeployMode::Automatic => "automatic",
            DeployMode::Lazy => "lazy",
            DeployMode::Manual => "manual",
        }
    }

    /// Resolve `Default` for the startup policy
    pub fn startup(self) -> Self {
        match self {
            DeployMode::Default => DeployMode::Automatic,
            other => other,
        }
    }

    /// Resolve `Default` for the redeploy policy
    pub fn redeploy(self) -> Self {
        match self {
            DeployMode::Default => DeployMode::Manual,
            other => other,
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" => Ok(DeployMode::Default),
            "automatic" => Ok(DeployMode::Automatic),
            "lazy" => Ok(DeployMode::Lazy),
            "manual" => Ok(DeployMode::Manual),
            other => Err(DeployError::ConfigError(format!(
                "'{}' is an unknown deploy mode. Expected: automatic, lazy, manual",
                other
            ))),
        }
    }
}

/// Where a controller candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    /// Declared in configuration
    Explicit,
    /// Found by scanning a deployment root
    Discovered,
}

impl ControllerType {
    /// Lower wins when two generators offer the same id
    pub const fn precedence(&self) -> u8 {
        match self {
            ControllerType::Explicit => 10,
            ControllerType::Discovered => 20,
        }
    }
}
