//! Error types for the device source.

use thiserror::Error;

/// Device source error type.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// TCP connect failed or the session dropped.
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// No reply within the configured I/O timeout.
    #[error("Device did not answer {operation} within {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// An operation needing a session was called without one.
    #[error("No device session")]
    NotConnected,

    /// Malformed frame or unexpected reply.
    #[error("Device protocol error: {0}")]
    Protocol(String),

    /// The device refused the comm password.
    #[error("Device rejected authentication")]
    Unauthenticated,
}

/// Coarse classification used by the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unreachable,
    Protocol,
}

impl DeviceError {
    pub fn kind(&self) -> DeviceErrorKind {
        match self {
            Self::Unreachable(_) | Self::Timeout { .. } | Self::NotConnected => {
                DeviceErrorKind::Unreachable
            }
            Self::Protocol(_) | Self::Unauthenticated => DeviceErrorKind::Protocol,
        }
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        Self::Unreachable(format!("{context}: {err}"))
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            DeviceError::Unreachable("refused".into()).kind(),
            DeviceErrorKind::Unreachable
        );
        assert_eq!(
            DeviceError::Timeout {
                operation: "connect",
                timeout_ms: 10
            }
            .kind(),
            DeviceErrorKind::Unreachable
        );
        assert_eq!(DeviceError::NotConnected.kind(), DeviceErrorKind::Unreachable);
        assert_eq!(
            DeviceError::Protocol("bad magic".into()).kind(),
            DeviceErrorKind::Protocol
        );
        assert_eq!(DeviceError::Unauthenticated.kind(), DeviceErrorKind::Protocol);
    }
}
