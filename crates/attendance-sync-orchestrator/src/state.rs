use serde::Serialize;
use std::fmt;

/// Where the loop is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Between cycles. The only point where shutdown is observed.
    #[default]
    Idle,
    /// Sending pending records to the sink.
    Draining,
    /// Pulling events from the device into the store.
    Ingesting,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::Ingesting => "ingesting",
        })
    }
}
