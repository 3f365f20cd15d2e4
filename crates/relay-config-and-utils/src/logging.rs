//! Logging initialization for the relay.
//!
//! All relay processes log through the observability crate, which writes
//! structured JSONL to `~/.attendance-relay/logs/relay.jsonl`.

use std::path::PathBuf;

/// Service name stamped on every log line.
const SERVICE_NAME: &str = "attendance-relay";

/// Initialize the logging system.
///
/// Log level comes from `RUST_LOG` when set, otherwise `level`. When
/// `log_path` is `None` the observability default location is used.
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path,
        also_stderr: true,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "error" => Some(tracing::Level::ERROR),
        _ => None,
    }
}
