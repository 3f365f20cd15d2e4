//! SQLite outbox for the attendance relay.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned schema migrations
//! - The `attendance` record model and its delivery status
//! - [`AttendanceStore`], the durable store the sync loop drains and fills
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let store = AttendanceStore::open(path).await?;
//! let pending = store.list_pending().await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
pub use store::AttendanceStore;
