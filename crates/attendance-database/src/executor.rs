//! SQLite access from async code.
//!
//! All statements run on one dedicated thread owned by `tokio-rusqlite`. The
//! sync loop awaits them like any other I/O, so device reads and HTTP calls
//! never share a runtime worker with a blocking SQLite call.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Pragmas applied to every connection before migrations run.
///
/// WAL lets `status` read while the loop writes; `synchronous = FULL` keeps
/// a committed delivery flag on disk across power loss.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;
    PRAGMA busy_timeout = 5000;
";

fn map_executor_error(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed | tokio_rusqlite::Error::Close(_) => {
            DatabaseError::Connection("outbox is closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Cloneable handle to the outbox connection.
///
/// Clones share the same executor thread; closing any clone closes it for all.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open the outbox file, creating it and its directory when missing,
    /// then bring the schema up to date.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let path = path.to_string_lossy().into_owned();
        let conn = Connection::open(path.clone())
            .await
            .map_err(|e| DatabaseError::Connection(format!("cannot open {path}: {e}")))?;
        let db = Self { conn, path };

        db.call_sqlite(|conn| conn.execute_batch(CONNECTION_PRAGMAS))
            .await?;
        db.call(|conn| migrations::run_migrations(conn)).await?;

        info!(
            path = %db.path,
            schema_version = migrations::CURRENT_VERSION,
            "Outbox database ready"
        );
        Ok(db)
    }

    /// Run `f` on the executor thread and hand back its result.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Nest the domain result inside the executor's Ok so it crosses the
        // channel untouched.
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(map_executor_error)?
    }

    /// Like [`call`](Self::call) for closures that only produce rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| f(conn).map_err(tokio_rusqlite::Error::from))
            .await
            .map_err(map_executor_error)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await?;
        debug!(path = %self.path, "Outbox reachable");
        Ok(())
    }

    /// Finish queued statements and stop the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn.close().await.map_err(map_executor_error)?;
        info!(path = %self.path, "Outbox database closed");
        Ok(())
    }
}
