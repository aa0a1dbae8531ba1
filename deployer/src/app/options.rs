//! Application configuration options

use std::time::Duration;

use crate::deploy::generator::expand::ExpandGeneratorOptions;
use crate::deploy::generator::explicit::ExplicitUnit;
use crate::deploy::environment::DEFAULT_MARKER;
use crate::utils::RetryPolicy;
use crate::workers::alarm;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server scope of auto-deploy tags
    pub stage: String,

    /// Relative path of the extraction marker inside each root
    pub marker: String,

    /// Enable the admin HTTP server
    pub enable_admin_server: bool,

    /// Admin server configuration
    pub server: ServerOptions,

    /// Alarm worker options
    pub alarm: alarm::Options,

    /// Retry policy for committing archives into the repository
    pub commit_retry: RetryPolicy,

    /// One generator per deployment root
    pub generators: Vec<ExpandGeneratorOptions>,

    /// Units declared in configuration
    pub units: Vec<ExplicitUnit>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            stage: "default".to_string(),
            marker: DEFAULT_MARKER.to_string(),
            enable_admin_server: true,
            server: ServerOptions::default(),
            alarm: alarm::Options::default(),
            commit_retry: RetryPolicy::default(),
            generators: Vec::new(),
            units: Vec::new(),
        }
    }
}

/// Lifecycle options for the host
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Admin HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
