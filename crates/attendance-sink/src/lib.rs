//! Remote sink for attendance records.
//!
//! [`RemoteSink::send`] makes one attempt and classifies the answer:
//! - 2xx: [`SendOutcome::Accepted`]
//! - 5xx: [`SinkError::Unavailable`] (retry next cycle)
//! - any other status: [`SendOutcome::Rejected`]
//! - transport failure or timeout: [`SinkError::Unreachable`]
//!
//! No retries happen here; the sync loop owns that policy.

mod error;
mod http;
mod sink;

#[cfg(test)]
mod tests;

pub use error::{SinkError, SinkResult};
pub use http::{HttpSink, HttpSinkConfig};
pub use sink::{RemoteSink, SendOutcome};
