//! Outbox error types.

use thiserror::Error;

/// Anything that went wrong inside the outbox.
///
/// The store never retries. Callers treat every variant as a storage
/// failure for the current cycle.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("outbox query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The executor thread is gone or the connection was closed.
    #[error("outbox connection unavailable: {0}")]
    Connection(String),

    #[error("outbox schema upgrade failed: {0}")]
    Migration(String),

    #[error("outbox file access failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back to a record.
    #[error("malformed outbox row: {0}")]
    InvalidData(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
