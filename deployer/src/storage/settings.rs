//! Settings file management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::options::{AppOptions, LifecycleOptions, ServerOptions};
use crate::deploy::controller::ControllerConfig;
use crate::deploy::environment::DEFAULT_MARKER;
use crate::deploy::fileset::FileSet;
use crate::deploy::generator::expand::ExpandGeneratorOptions;
use crate::deploy::generator::explicit::ExplicitUnit;
use crate::deploy::mode::{ControllerType, DeployMode};
use crate::deploy::tag::DeployTag;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::{LogLevel, LogOptions};
use crate::utils::RetryPolicy;
use crate::workers::alarm;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON logs
    #[serde(default)]
    pub json_logs: bool,

    /// Server scope of auto-deploy tags
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Extraction marker path inside each root
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Alarm interval in seconds
    #[serde(default = "default_alarm_interval")]
    pub alarm_interval_secs: u64,

    /// Graceful shutdown bound in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// Admin HTTP server
    #[serde(default)]
    pub admin: AdminSettings,

    /// Retry policy for archive commits
    #[serde(default)]
    pub commit_retry: RetrySettings,

    /// Deployment roots
    #[serde(default)]
    pub roots: Vec<RootSettings>,

    /// Declared units
    #[serde(default)]
    pub units: Vec<UnitSettings>,
}

fn default_true() -> bool {
    true
}

fn default_stage() -> String {
    "default".to_string()
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

fn default_alarm_interval() -> u64 {
    5
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            stage: default_stage(),
            marker: default_marker(),
            alarm_interval_secs: default_alarm_interval(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
            admin: AdminSettings::default(),
            commit_retry: RetrySettings::default(),
            roots: Vec::new(),
            units: Vec::new(),
        }
    }
}

impl Settings {
    /// Read a JSON settings file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        File::new(path.as_ref()).read_json::<Settings>().await
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.log_level,
            log_dir: self.log_dir.clone(),
            json_format: self.json_logs,
            ..LogOptions::default()
        }
    }

    /// Convert into runtime options. Mode strings are validated here.
    pub fn to_app_options(&self) -> Result<AppOptions, DeployError> {
        let generators = self
            .roots
            .iter()
            .map(RootSettings::to_options)
            .collect::<Result<Vec<_>, _>>()?;
        let units = self
            .units
            .iter()
            .map(UnitSettings::to_unit)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AppOptions {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(self.max_shutdown_delay_secs),
            },
            stage: self.stage.clone(),
            marker: self.marker.clone(),
            enable_admin_server: self.admin.enabled,
            server: ServerOptions {
                host: self.admin.host.clone(),
                port: self.admin.port,
            },
            alarm: alarm::Options {
                interval: Duration::from_secs(self.alarm_interval_secs),
            },
            commit_retry: self.commit_retry.to_policy()?,
            generators,
            units,
        })
    }
}

/// Admin server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_admin_host")]
    pub host: String,

    #[serde(default = "default_admin_port")]
    pub port: u16,
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    8080
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

/// Commit retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> Result<RetryPolicy, DeployError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(DeployError::ConfigError(format!(
                "commit_retry.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        })
    }
}

/// One deployment root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootSettings {
    #[serde(default = "default_id_type")]
    pub id_type: String,

    #[serde(default = "default_generator_key")]
    pub generator_key: String,

    pub expand_root: PathBuf,

    #[serde(default)]
    pub archive_root: Option<PathBuf>,

    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,

    #[serde(default)]
    pub expand_prefix: String,

    #[serde(default)]
    pub expand_suffix: String,

    #[serde(default)]
    pub require_files: Vec<String>,

    #[serde(default)]
    pub versioning: bool,

    #[serde(default)]
    pub startup_mode: Option<String>,

    #[serde(default)]
    pub redeploy_mode: Option<String>,

    #[serde(default)]
    pub startup_priority: Option<i32>,

    #[serde(default)]
    pub check_interval_ms: Option<u64>,

    #[serde(default)]
    pub redeploy_check_interval_ms: Option<u64>,

    #[serde(default)]
    pub dependency_check_interval_ms: Option<u64>,

    #[serde(default)]
    pub cleanup: Option<FileSet>,
}

fn default_id_type() -> String {
    "webapp".to_string()
}

fn default_generator_key() -> String {
    "default".to_string()
}

fn default_archive_extension() -> String {
    ".tar".to_string()
}

fn parse_mode(value: &Option<String>) -> Result<DeployMode, DeployError> {
    match value {
        Some(value) => value.parse(),
        None => Ok(DeployMode::Default),
    }
}

impl RootSettings {
    pub fn to_options(&self) -> Result<ExpandGeneratorOptions, DeployError> {
        let defaults = ExpandGeneratorOptions::default();
        Ok(ExpandGeneratorOptions {
            id_type: self.id_type.clone(),
            generator_key: self.generator_key.clone(),
            expand_root: self.expand_root.clone(),
            archive_root: self.archive_root.clone(),
            archive_extension: self.archive_extension.clone(),
            expand_prefix: self.expand_prefix.clone(),
            expand_suffix: self.expand_suffix.clone(),
            require_files: self.require_files.clone(),
            versioning: self.versioning,
            startup_mode: parse_mode(&self.startup_mode)?,
            redeploy_mode: parse_mode(&self.redeploy_mode)?,
            startup_priority: self.startup_priority,
            check_interval: self
                .check_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.check_interval),
            redeploy_check_interval: self.redeploy_check_interval_ms.map(Duration::from_millis),
            dependency_check_interval: self.dependency_check_interval_ms.map(Duration::from_millis),
            cleanup: self.cleanup.clone(),
        })
    }
}

/// One declared unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSettings {
    pub name: String,

    #[serde(default = "default_id_type")]
    pub id_type: String,

    /// Tag key; the name when unset
    #[serde(default)]
    pub id_key: Option<String>,

    pub root_directory: PathBuf,

    #[serde(default)]
    pub archive_path: Option<PathBuf>,

    #[serde(default)]
    pub startup_mode: Option<String>,

    #[serde(default)]
    pub redeploy_mode: Option<String>,

    #[serde(default)]
    pub startup_priority: Option<i32>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl UnitSettings {
    pub fn to_unit(&self) -> Result<ExplicitUnit, DeployError> {
        let mut config = ControllerConfig::new(&self.root_directory, ControllerType::Explicit)
            .with_modes(parse_mode(&self.startup_mode)?, parse_mode(&self.redeploy_mode)?);
        config.archive_path = self.archive_path.clone();
        config.startup_priority = self.startup_priority;
        config.attributes = self.attributes.clone();

        let key = self.id_key.clone().unwrap_or_else(|| self.name.clone());
        Ok(ExplicitUnit::new(
            self.name.clone(),
            DeployTag::new(self.id_type.clone(), key),
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.stage, "default");
        assert_eq!(settings.alarm_interval_secs, 5);
        assert!(settings.admin.enabled);

        let options = settings.to_app_options().unwrap();
        assert_eq!(options.commit_retry.max_attempts, 3);
        assert_eq!(options.alarm.interval, Duration::from_secs(5));
        assert!(options.generators.is_empty());
    }

    #[test]
    fn test_roots_and_units() {
        let json = r#"{
            "log_level": "debug",
            "roots": [{"expand_root": "/srv/webapps", "versioning": true, "redeploy_mode": "automatic"}],
            "units": [{"name": "admin", "root_directory": "/srv/admin", "startup_priority": -1}]
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let options = settings.to_app_options().unwrap();

        let root = &options.generators[0];
        assert_eq!(root.expand_root, PathBuf::from("/srv/webapps"));
        assert_eq!(root.redeploy_mode, DeployMode::Automatic);
        assert_eq!(root.archive_extension, ".tar");
        assert!(root.versioning);

        let unit = &options.units[0];
        assert_eq!(unit.tag.id(), "webapp/admin");
        assert_eq!(unit.config.priority(), -1);
        assert_eq!(unit.config.controller_type, ControllerType::Explicit);
    }

    #[test]
    fn test_bad_mode_is_config_error() {
        let json = r#"{"roots": [{"expand_root": "/srv", "startup_mode": "sometimes"}]}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let err = settings.to_app_options().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_retry_multiplier_is_validated() {
        let json = r#"{"commit_retry": {"multiplier": -2.0}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let err = settings.to_app_options().unwrap_err();
        assert!(err.is_config());

        let json = r#"{"commit_retry": {"multiplier": 0.5}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert!(settings.to_app_options().unwrap_err().is_config());

        let json = r#"{"commit_retry": {"multiplier": 1.0, "max_attempts": 0}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let policy = settings.to_app_options().unwrap().commit_retry;
        assert_eq!(policy.max_attempts, 1);
    }
}
