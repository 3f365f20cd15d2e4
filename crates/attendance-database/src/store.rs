//! Durable store for attendance records awaiting delivery.

use crate::{
    migrations, queries, AsyncDatabase, AttendanceRecord, DatabaseResult, DeliveryCounts,
    NaturalKey, NewAttendanceRecord,
};
use std::path::Path;
use tracing::{debug, info};

/// Outbox of attendance records, backed by SQLite.
///
/// Every method is a single statement on the executor thread, so each
/// mutation is durable once it returns `Ok`.
#[derive(Clone)]
pub struct AttendanceStore {
    db: AsyncDatabase,
}

impl AttendanceStore {
    /// Open (or create) the store at `path` and bring the schema up to date.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        let db = AsyncDatabase::open(path).await?;
        Ok(Self { db })
    }

    pub fn from_database(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub fn path(&self) -> &str {
        self.db.path()
    }

    /// Create the `attendance` table if missing. Idempotent.
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        self.db.call(|conn| migrations::run_migrations(conn)).await
    }

    /// Insert a newly observed event. Returns `false` if it was already stored.
    pub async fn insert_if_absent(&self, record: NewAttendanceRecord) -> DatabaseResult<bool> {
        let inserted = self
            .db
            .call(move |conn| queries::insert_if_absent(conn, &record))
            .await?;
        Ok(inserted)
    }

    /// Store everything a device fetch returned in one transaction.
    /// Returns how many records were new.
    pub async fn insert_many(&self, records: Vec<NewAttendanceRecord>) -> DatabaseResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.db
            .call(move |conn| queries::insert_many(conn, &records))
            .await
    }

    /// Pending records ordered by capture time, oldest first.
    pub async fn list_pending(&self) -> DatabaseResult<Vec<AttendanceRecord>> {
        let pending = self.db.call(|conn| queries::list_pending(conn)).await?;
        debug!(count = pending.len(), "Listed pending records");
        Ok(pending)
    }

    /// Flag a record as delivered. Unknown or already delivered keys are ignored.
    pub async fn mark_delivered(&self, key: &NaturalKey) -> DatabaseResult<()> {
        let key = key.clone();
        let changed = self
            .db
            .call(move |conn| queries::mark_delivered(conn, &key))
            .await?;
        if !changed {
            debug!("mark_delivered matched no pending row");
        }
        Ok(())
    }

    pub async fn find(&self, key: &NaturalKey) -> DatabaseResult<Option<AttendanceRecord>> {
        let key = key.clone();
        self.db.call(move |conn| queries::find_by_key(conn, &key)).await
    }

    pub async fn delivery_counts(&self) -> DatabaseResult<DeliveryCounts> {
        self.db.call(|conn| queries::delivery_counts(conn)).await
    }

    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.db.health_check().await
    }

    pub async fn close(self) -> DatabaseResult<()> {
        info!(path = %self.db.path(), "Closing attendance store");
        self.db.close().await
    }
}
