//! Process configuration (`cronify.yaml`).
//!
//! Everything has a default, so the file is optional and may be partial.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use super::labels::DEFAULT_LABEL_PREFIX;

/// Global configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Label prefix jobs are declared under.
    pub label_prefix: String,
    /// Label filter (`key` or `key=value`) selecting containers to watch.
    pub container_filter: String,
    /// Scheduler tick interval in seconds.
    pub tick_interval_secs: u64,
    /// Interval between exec status polls in seconds.
    pub exec_poll_interval_secs: u64,
    /// How long shutdown waits for in-flight runs, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Timezone cron expressions are evaluated in.
    pub timezone: String,
    /// Event stream reconnect settings.
    pub watch: WatchConfig,
    /// Docker connection settings.
    pub docker: DockerConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            container_filter: format!("{}=true", DEFAULT_LABEL_PREFIX),
            tick_interval_secs: 1,
            exec_poll_interval_secs: 2,
            shutdown_timeout_secs: 30,
            timezone: "UTC".to_string(),
            watch: WatchConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

/// Reconnect backoff for the container event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the reconnect delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl WatchConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Docker connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// Local defaults (`DOCKER_HOST` or the platform socket) when unset.
    pub host: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl GlobalConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "label_prefix cannot be empty".to_string(),
            ));
        }
        if self.label_prefix.ends_with('.') {
            return Err(ConfigError::InvalidConfig(
                "label_prefix must not end with '.'".to_string(),
            ));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_secs cannot be zero".to_string(),
            ));
        }
        if self.exec_poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "exec_poll_interval_secs cannot be zero".to_string(),
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        if self.watch.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "watch.initial_backoff_ms cannot be zero".to_string(),
            ));
        }
        if self.watch.initial_backoff_ms > self.watch.max_backoff_ms {
            return Err(ConfigError::InvalidConfig(
                "watch.initial_backoff_ms cannot exceed watch.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn exec_poll_interval(&self) -> Duration {
        Duration::from_secs(self.exec_poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
