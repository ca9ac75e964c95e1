//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::Filesystem;

/// Default Hetzner Cloud API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Default Unix socket the plugin protocol listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/hetzner.sock";

/// Default propagated mount root; per-request mountpoints live below it.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Upper bound accepted for `action_timeout_secs` (one day).
pub const MAX_ACTION_TIMEOUT_SECS: u64 = 86_400;

/// Process-wide driver configuration derived from environment variables and
/// configuration files. Built once at startup and handed to the driver.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HETZNER_VOLUME",
    discovery(
        app_name = "hetzner-volume-driver",
        env_var = "HETZNER_VOLUME_CONFIG_PATH",
        config_file_name = "hetzner-volume.toml",
        dotfile_name = ".hetzner-volume.toml",
        project_file_name = "hetzner-volume.toml"
    )
)]
pub struct DriverConfig {
    /// Hetzner Cloud API token. This value is required.
    pub api_token: String,
    /// Base URL of the control-plane API.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Namespace prefix applied to every remote volume name. Volumes without
    /// it are invisible to the driver.
    #[ortho_config(default = "docker".to_owned())]
    pub name_prefix: String,
    /// Volume size in GB used when a request does not carry `size`.
    pub default_size_gb: Option<u32>,
    /// Filesystem used when a request does not carry `fstype`.
    #[ortho_config(default = "ext4".to_owned())]
    pub default_fstype: String,
    /// Owner uid applied to new volumes when a request does not carry `uid`.
    #[ortho_config(default = 0)]
    pub default_uid: u32,
    /// Owner gid applied to new volumes when a request does not carry `gid`.
    #[ortho_config(default = 0)]
    pub default_gid: u32,
    /// Whether to enable deletion protection after a volume is created.
    #[ortho_config(default = false)]
    pub use_protection: bool,
    /// Unix socket path served by the plugin protocol.
    #[ortho_config(default = DEFAULT_SOCKET_PATH.to_owned())]
    pub socket_path: String,
    /// Propagated mount root.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Interval between action status polls, in milliseconds.
    #[ortho_config(default = 500)]
    pub poll_interval_ms: u64,
    /// Optional deadline applied to the action waits of a single request.
    pub action_timeout_secs: Option<u64>,
    /// Log verbosity (`trace`, `debug`, `info`, `warn` or `error`).
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// Whether to emit JSON formatted log lines.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to hetzner-volume.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, value: &str, expected: &str) -> ConfigError {
        ConfigError::InvalidField(format!(
            "invalid {} {value:?} (expected {expected}): fix {} or {} in hetzner-volume.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const API_TOKEN: FieldMetadata =
    FieldMetadata::new("Hetzner Cloud API token", "HETZNER_VOLUME_API_TOKEN", "api_token");
const API_ENDPOINT: FieldMetadata =
    FieldMetadata::new("API endpoint", "HETZNER_VOLUME_API_ENDPOINT", "api_endpoint");
const NAME_PREFIX: FieldMetadata =
    FieldMetadata::new("volume name prefix", "HETZNER_VOLUME_NAME_PREFIX", "name_prefix");
const DEFAULT_FSTYPE: FieldMetadata = FieldMetadata::new(
    "default filesystem",
    "HETZNER_VOLUME_DEFAULT_FSTYPE",
    "default_fstype",
);
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "action poll interval",
    "HETZNER_VOLUME_POLL_INTERVAL_MS",
    "poll_interval_ms",
);
const ACTION_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "action timeout",
    "HETZNER_VOLUME_ACTION_TIMEOUT_SECS",
    "action_timeout_secs",
);
const SOCKET_PATH: FieldMetadata =
    FieldMetadata::new("plugin socket path", "HETZNER_VOLUME_SOCKET_PATH", "socket_path");
const MOUNT_ROOT: FieldMetadata =
    FieldMetadata::new("mount root", "HETZNER_VOLUME_MOUNT_ROOT", "mount_root");
const LOG_LEVEL: FieldMetadata =
    FieldMetadata::new("log level", "HETZNER_VOLUME_LOG_LEVEL", "log_level");

impl DriverConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hetzner-volume-driver")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidField`] when a value cannot be interpreted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.api_token, &API_TOKEN)?;
        Self::require_field(&self.api_endpoint, &API_ENDPOINT)?;
        Self::require_field(&self.name_prefix, &NAME_PREFIX)?;
        Self::require_field(&self.socket_path, &SOCKET_PATH)?;
        Self::require_field(&self.mount_root, &MOUNT_ROOT)?;
        if Filesystem::from_str(self.default_fstype.trim()).is_err() {
            return Err(DEFAULT_FSTYPE.invalid(&self.default_fstype, "ext4, xfs, ext3 or ext2"));
        }
        if self.poll_interval_ms == 0 {
            return Err(POLL_INTERVAL.invalid("0", "a positive number of milliseconds"));
        }
        if let Some(secs) = self
            .action_timeout_secs
            .filter(|secs| !(1..=MAX_ACTION_TIMEOUT_SECS).contains(secs))
        {
            return Err(ACTION_TIMEOUT.invalid(
                &secs.to_string(),
                &format!("between 1 and {MAX_ACTION_TIMEOUT_SECS} seconds"),
            ));
        }
        self.log_filter_level()?;
        Ok(())
    }

    /// Returns the trimmed API token.
    #[must_use]
    pub fn token(&self) -> &str {
        self.api_token.trim()
    }

    /// Interval between action status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-request deadline for action waits, if configured.
    #[must_use]
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_secs.map(Duration::from_secs)
    }

    /// Propagated mount root as a UTF-8 path.
    #[must_use]
    pub fn mount_root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.mount_root.trim())
    }

    /// Plugin socket as a UTF-8 path.
    #[must_use]
    pub fn socket(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.socket_path.trim())
    }

    /// Parses the configured log level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the level is not one of the
    /// `tracing` levels.
    pub fn log_filter_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(self.log_level.trim())
            .map_err(|_| LOG_LEVEL.invalid(&self.log_level, "trace, debug, info, warn or error"))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds a value that cannot be used.
    #[error("invalid configuration field: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
