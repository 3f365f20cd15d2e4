//! Attendance event source for ZK time-clock terminals.
//!
//! [`DeviceSource`] is the seam the sync loop depends on. [`ZkDeviceSource`]
//! implements it over the terminal's TCP protocol (see [`protocol`]).

mod client;
mod error;
pub mod protocol;
mod source;

#[cfg(test)]
mod tests;

pub use client::ZkClient;
pub use error::{DeviceError, DeviceErrorKind, DeviceResult};
pub use source::{DeviceEvent, DeviceSource, ZkDeviceSource, ZkSettings};
