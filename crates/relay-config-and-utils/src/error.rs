//! Startup errors: configuration, paths and config file I/O.

use thiserror::Error;

/// Failure while resolving paths or loading and validating configuration.
///
/// Every variant ends up logged as `configuration_error`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting is missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("endpoint is not a valid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The base directory could not be determined.
    #[error("cannot resolve relay directory: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
