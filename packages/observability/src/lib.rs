//! # Observability
//!
//! Centralized logging layer for the attendance relay.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Every event is written as one JSON line to
//! an append-only log file (`~/.attendance-relay/logs/relay.jsonl` unless a path
//! is configured), and optionally mirrored to stderr in a compact format.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "attendance-relay".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{LogFileWriter, WriterFactory};

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written as `service` on every line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,

    /// JSONL file; `~/.attendance-relay/logs/relay.jsonl` when `None`.
    pub log_path: Option<PathBuf>,

    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".attendance-relay")
        .join("logs")
        .join("relay.jsonl")
}

/// [`init_with_config`] with defaults and the given service name.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Install the global subscriber. Later calls are no-ops.
///
/// An unwritable log file drops the JSON layer and forces stderr on; it
/// never stops the relay from starting.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let (json_layer, open_error) = match LogFileWriter::new(&log_path) {
        Ok(writer) => (
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            )),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    let stderr_layer = if config.also_stderr || json_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_ansi(true),
        )
    } else {
        None
    };

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter())))
        .with(stderr_layer.map(|l| l.with_filter(env_filter())))
        .try_init();

    if installed.is_err() {
        // A global subscriber is already set (tests, embedding hosts).
        return;
    }

    match open_error {
        None => tracing::info!(
            service = %config.service_name,
            log_path = %log_path.display(),
            "Logging to file"
        ),
        Some(e) => tracing::warn!(
            log_path = %log_path.display(),
            error = %e,
            "Log file unavailable, logging to stderr only"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_logs_info_to_file_only() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            service_name: "attendance-relay".into(),
            log_path: Some(dir.path().join("relay.jsonl")),
            ..Default::default()
        };

        init_with_config(config.clone());
        init_with_config(config);
    }

    #[test]
    fn test_default_log_path_is_jsonl() {
        let path = default_log_path();
        assert!(path.ends_with("logs/relay.jsonl"));
    }
}
