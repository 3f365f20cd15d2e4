//! Error classification for the sync loop.

use attendance_database::DatabaseError;
use attendance_sink::SinkError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use zk_device_source::{DeviceError, DeviceErrorKind};

/// Failure class attached to every logged error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    DeviceUnreachable,
    DeviceProtocolError,
    SinkUnreachable,
    SinkUnavailable,
    Rejected,
    StorageFailure,
    ConfigurationError,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceUnreachable => "device_unreachable",
            Self::DeviceProtocolError => "device_protocol_error",
            Self::SinkUnreachable => "sink_unreachable",
            Self::SinkUnavailable => "sink_unavailable",
            Self::Rejected => "rejected",
            Self::StorageFailure => "storage_failure",
            Self::ConfigurationError => "configuration_error",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync loop error.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl SyncError {
    pub fn storage(operation: &'static str) -> impl FnOnce(DatabaseError) -> Self {
        move |source| Self::Storage { operation, source }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Storage { .. } => ErrorClass::StorageFailure,
            Self::Device(e) => match e.kind() {
                DeviceErrorKind::Unreachable => ErrorClass::DeviceUnreachable,
                DeviceErrorKind::Protocol => ErrorClass::DeviceProtocolError,
            },
            Self::Sink(SinkError::Unreachable(_)) => ErrorClass::SinkUnreachable,
            Self::Sink(SinkError::Unavailable { .. }) => ErrorClass::SinkUnavailable,
            Self::Sink(SinkError::Client(_)) => ErrorClass::ConfigurationError,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
