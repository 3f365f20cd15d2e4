//! Sync loop between an attendance device and the remote endpoint.
//!
//! Every cycle walks `Idle -> Draining -> Ingesting -> Idle`:
//!
//! 1. **Draining**: send every pending record, oldest first. Accepted records
//!    are marked delivered; rejected ones stay pending; an unreachable sink
//!    ends the drain for this cycle.
//! 2. **Ingesting**: connect if needed, fetch the device's events and insert
//!    the ones the store has not seen. Device errors drop the session so the
//!    next cycle reconnects.
//!
//! Draining before ingesting keeps the backlog moving even while the device
//! is offline.

mod error;
mod orchestrator;
mod report;
mod state;

#[cfg(test)]
mod tests;

pub use error::{ErrorClass, SyncError, SyncResult};
pub use orchestrator::{SyncConfig, SyncOrchestrator};
pub use report::CycleReport;
pub use state::SyncState;
