//! Configuration management for the relay.
//!
//! Resolution order: built-in defaults, then `config.json` under the base
//! directory, then `ATTENDANCE_RELAY_*` environment variables. The binary
//! applies CLI flags last and calls [`Config::validate`] before anything
//! touches the network or the database.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default TCP port of ZK attendance devices.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

const DEFAULT_DEVICE_HOST: &str = "192.168.0.1";
const DEFAULT_ENDPOINT_URL: &str = "https://hr.example.com/api/attendance/";
const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

const ENV_PREFIX: &str = "ATTENDANCE_RELAY_";

/// Connection settings for the attendance device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device IP address or hostname.
    pub host: String,
    /// Device TCP port.
    pub port: u16,
    /// Communication password configured on the device (0 = none).
    pub password: u32,
    /// Timeout applied to every device socket operation.
    pub timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_DEVICE_HOST.to_string(),
            port: DEFAULT_DEVICE_PORT,
            password: 0,
            timeout_secs: DEFAULT_DEVICE_TIMEOUT_SECS,
        }
    }
}

/// Settings for the remote collection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Endpoint receiving one POST per attendance record.
    pub endpoint_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            timeout_secs: DEFAULT_SINK_TIMEOUT_SECS,
        }
    }
}

/// Main relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Attendance device connection.
    #[serde(default)]
    pub device: DeviceSettings,
    /// Remote collection endpoint.
    #[serde(default)]
    pub sink: SinkSettings,
    /// Seconds to sleep between sync cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Outbox database location; defaults to the base directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device: DeviceSettings::default(),
            sink: SinkSettings::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            database_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the base directory and the process environment.
    ///
    /// A missing config file falls back to defaults; a malformed one is an error.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from `ATTENDANCE_RELAY_*` variables.
    ///
    /// `lookup` resolves a full variable name; blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        if let Some((_, v)) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some((_, v)) = var("DEVICE_HOST") {
            self.device.host = v;
        }
        if let Some((name, v)) = var("DEVICE_PORT") {
            self.device.port = parse_env(&name, &v)?;
        }
        if let Some((name, v)) = var("DEVICE_PASSWORD") {
            self.device.password = parse_env(&name, &v)?;
        }
        if let Some((name, v)) = var("DEVICE_TIMEOUT_SECS") {
            self.device.timeout_secs = parse_env(&name, &v)?;
        }
        if let Some((_, v)) = var("ENDPOINT_URL") {
            self.sink.endpoint_url = v;
        }
        if let Some((name, v)) = var("SINK_TIMEOUT_SECS") {
            self.sink.timeout_secs = parse_env(&name, &v)?;
        }
        if let Some((name, v)) = var("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_env(&name, &v)?;
        }
        if let Some((_, v)) = var("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check that every field is usable for a process lifetime.
    pub fn validate(&self) -> CoreResult<()> {
        if crate::parse_level(&self.log_level).is_none() {
            return Err(CoreError::Config(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        if self.device.host.trim().is_empty() {
            return Err(CoreError::Config("device host is empty".to_string()));
        }
        if self.device.port == 0 {
            return Err(CoreError::Config("device port must be non-zero".to_string()));
        }
        if self.device.timeout_secs == 0 {
            return Err(CoreError::Config(
                "device timeout must be at least one second".to_string(),
            ));
        }
        if self.sink.timeout_secs == 0 {
            return Err(CoreError::Config(
                "sink timeout must be at least one second".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(CoreError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        self.endpoint_url()?;
        Ok(())
    }

    /// Get the endpoint as a parsed http(s) URL.
    pub fn endpoint_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.sink.endpoint_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CoreError::Config(format!(
                "endpoint scheme must be http or https, got {other}"
            ))),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device.timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink.timeout_secs)
    }

    /// Resolve the outbox database path.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value
        .parse()
        .map_err(|_| CoreError::Config(format!("{name} has invalid value {value:?}")))
}
