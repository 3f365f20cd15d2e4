//! Core configuration, paths, and logging bootstrap for the attendance relay.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DeviceSettings, SinkSettings, DEFAULT_DEVICE_PORT, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
