//! Per-cycle outcome.

use crate::ErrorClass;
use serde::Serialize;
use tracing::{info, warn};

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Pending records found when the drain started.
    pub pending: usize,
    pub delivered: usize,
    pub rejected: usize,
    /// The sink became unreachable and the rest of the drain was skipped.
    pub drain_aborted: bool,
    pub fetched: usize,
    /// Events that were new to the store.
    pub ingested: usize,
    /// No session could be established, so nothing was fetched.
    pub ingestion_skipped: bool,
    /// Class of the device error that ended ingestion, if any.
    pub device_error: Option<ErrorClass>,
    /// Set when the cycle stopped early on a store failure.
    pub storage_failure: Option<String>,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Default::default()
        }
    }

    /// True when nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.rejected == 0
            && !self.drain_aborted
            && !self.ingestion_skipped
            && self.device_error.is_none()
            && self.storage_failure.is_none()
    }

    pub fn log(&self) {
        if self.is_clean() {
            info!(
                cycle = self.cycle,
                pending = self.pending,
                delivered = self.delivered,
                fetched = self.fetched,
                ingested = self.ingested,
                "Sync cycle complete"
            );
        } else {
            warn!(
                cycle = self.cycle,
                pending = self.pending,
                delivered = self.delivered,
                rejected = self.rejected,
                drain_aborted = self.drain_aborted,
                fetched = self.fetched,
                ingested = self.ingested,
                ingestion_skipped = self.ingestion_skipped,
                device_error = ?self.device_error,
                storage_failure = ?self.storage_failure,
                "Sync cycle completed with problems"
            );
        }
    }
}
