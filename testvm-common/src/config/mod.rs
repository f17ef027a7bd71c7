//! Configuration system for testvm.
//!
//! Values are resolved in this order, later sources winning:
//! - built-in defaults
//! - a TOML file (`--config`, `./testvm.toml` or `<config_dir>/testvm/config.toml`)
//! - `TESTVM_*` environment variables
//!
//! The force flag is deliberately absent: it exists only on the command line.

pub mod env;
pub mod source;
pub mod validate;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};
pub use validate::{ConfigWarning, Severity, guest_dir_problem, validate_config};

use crate::types::MachineName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "testvm.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Env(Vec<EnvError>),
}

/// testvm configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestvmConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Vagrant machine name.
    #[serde(default = "default_machine_name")]
    pub name: String,
    /// VirtualBox VM name used for snapshots; defaults to `name`.
    #[serde(default)]
    pub vbox_name: Option<String>,
    /// Vagrant box the machine is built from.
    #[serde(default = "default_box_name")]
    pub box_name: String,
    /// Directory holding the Vagrantfile; defaults to the working directory.
    #[serde(default)]
    pub vagrant_dir: Option<PathBuf>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            vbox_name: None,
            box_name: default_box_name(),
            vagrant_dir: None,
        }
    }
}

impl MachineConfig {
    pub fn machine_name(&self) -> MachineName {
        MachineName::new(self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for any single controller call.
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// How long to wait for an ACPI shutdown before cutting power.
    #[serde(default = "default_graceful_stop_secs")]
    pub graceful_stop_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            graceful_stop_secs: default_graceful_stop_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_short_attempts")]
    pub short_attempts: u32,
    #[serde(default = "default_long_attempts")]
    pub long_attempts: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Guest command that succeeds once the desktop session is up.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            short_attempts: default_short_attempts(),
            long_attempts: default_long_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            probe_command: default_probe_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Provisioner run after every restoration to sync the test payload.
    #[serde(default = "default_sync_step")]
    pub sync_step: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            sync_step: default_sync_step(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Host directory holding logs, reports, results and artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Guest directory wiped by the vm-internal-data cleanup.
    #[serde(default = "default_guest_artifacts_dir")]
    pub guest_artifacts_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            guest_artifacts_dir: default_guest_artifacts_dir(),
        }
    }
}

impl PathsConfig {
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Session logs; outside the artifact dirs so cleanups keep history.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Host artifacts older than this are removed by data-basic.
    #[serde(default = "default_basic_max_age_hours")]
    pub basic_max_age_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            basic_max_age_hours: default_basic_max_age_hours(),
        }
    }
}

impl CleanupConfig {
    pub fn basic_max_age(&self) -> Duration {
        Duration::from_secs(self.basic_max_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    /// Host command handed the ready machine by `run-tests`.
    #[serde(default = "default_tests_command")]
    pub command: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: default_tests_command(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_machine_name() -> String {
    "testvm".to_string()
}

fn default_box_name() -> String {
    "ubuntu/jammy64".to_string()
}

fn default_command_secs() -> u64 {
    900
}

fn default_graceful_stop_secs() -> u64 {
    60
}

fn default_short_attempts() -> u32 {
    5
}

fn default_long_attempts() -> u32 {
    30
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_probe_command() -> String {
    "pgrep -x Xorg".to_string()
}

fn default_sync_step() -> String {
    "sync".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("testvm")
}

fn default_guest_artifacts_dir() -> String {
    "/home/vagrant/test-artifacts".to_string()
}

fn default_basic_max_age_hours() -> u64 {
    24
}

fn default_tests_command() -> Vec<String> {
    vec!["bats".to_string(), "tests/".to_string()]
}

impl TestvmConfig {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from an explicit path, or the first default location that exists.
    /// Returns the configuration and the file it came from, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_locations().into_iter().find(|p| p.is_file()),
        };

        let Some(path) = path else {
            debug!("No configuration file found, using defaults");
            return Ok((Self::default(), None));
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&contents, &path)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok((config, Some(path)))
    }

    /// Apply `TESTVM_*` overrides. All invalid variables are reported together.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Result<Vec<ConfigSource>, ConfigError> {
        let mut applied = Vec::new();

        if let Some(machine) = parser.get_opt_string("MACHINE") {
            applied.push(machine.source.clone());
            self.machine.name = machine.into_inner();
        }
        if let Some(dir) = parser.get_opt_path("DATA_DIR") {
            applied.push(dir.source.clone());
            self.paths.data_dir = dir.into_inner();
        }

        let level = parser.get_log_level("LOG_LEVEL", &self.general.log_level);
        if level.is_from_env() {
            applied.push(level.source.clone());
            self.general.log_level = level.into_inner();
        }

        if let Some(format) = parser.get_opt_string("LOG_FORMAT") {
            match format.value.to_lowercase().as_str() {
                "json" => self.general.log_format = LogFormat::Json,
                "pretty" => self.general.log_format = LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::Env(vec![EnvError::InvalidValue {
                        var: "TESTVM_LOG_FORMAT".to_string(),
                        expected: "pretty or json".to_string(),
                        value: format.value,
                    }]));
                }
            }
            applied.push(format.source);
        }

        let timeout = parser.get_u64_range("COMMAND_TIMEOUT_SECS", self.timeouts.command_secs, 1, 86_400);
        if timeout.is_from_env() {
            applied.push(timeout.source.clone());
            self.timeouts.command_secs = timeout.into_inner();
        }

        let interval = parser.get_u64_range(
            "POLL_INTERVAL_SECS",
            self.readiness.poll_interval_secs,
            1,
            300,
        );
        if interval.is_from_env() {
            applied.push(interval.source.clone());
            self.readiness.poll_interval_secs = interval.into_inner();
        }

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(applied)
    }
}

/// Default config locations, most specific first.
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("testvm").join("config.toml"));
    }
    locations
}
