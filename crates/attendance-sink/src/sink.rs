//! The remote sink abstraction.

use crate::SinkResult;
use async_trait::async_trait;
use attendance_database::AttendanceRecord;

/// Answer from the remote endpoint for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// The endpoint refused the record. Resending it unchanged will not help.
    Rejected { status: u16, reason: String },
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Destination for attendance records.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Make exactly one delivery attempt.
    async fn send(&self, record: &AttendanceRecord) -> SinkResult<SendOutcome>;
}
