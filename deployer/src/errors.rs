//! Error types for the deployment engine

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad policy value, malformed setting, conflicting deployment sources.
    /// Fatal to one unit, never to the process.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Repository unreachable, archive unreadable, expansion failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The wrapped deploy instance failed during init or start.
    #[error("Instance error: {0}")]
    InstanceError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Invalid transition: {from} -> {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Configuration errors are not worth retrying
    pub fn is_config(&self) -> bool {
        matches!(self, DeployError::ConfigError(_))
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

impl From<walkdir::Error> for DeployError {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => DeployError::IoError(io),
            None => DeployError::Internal("filesystem loop detected".to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::Internal(err.to_string())
    }
}
