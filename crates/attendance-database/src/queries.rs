//! Standalone query functions over the `attendance` table.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside [`crate::AsyncDatabase::call`] or directly against a test connection.

use crate::models::{format_timestamp, parse_timestamp};
use crate::{
    AttendanceRecord, DatabaseResult, DeliveryCounts, DeliveryStatus, NaturalKey,
    NewAttendanceRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

const RECORD_COLUMNS: &str = "id, device_user_id, timestamp, api_status";

/// A row as stored, before the timestamp text is parsed.
struct StoredRow {
    record_id: i64,
    subject_id: String,
    timestamp: String,
    delivery_status: DeliveryStatus,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_id: row.get(0)?,
            subject_id: row.get(1)?,
            timestamp: row.get(2)?,
            delivery_status: row.get(3)?,
        })
    }

    fn decode(self) -> Result<AttendanceRecord, Self> {
        match parse_timestamp(&self.timestamp) {
            Some(timestamp) => Ok(AttendanceRecord {
                record_id: self.record_id,
                subject_id: self.subject_id,
                timestamp,
                delivery_status: self.delivery_status,
            }),
            None => Err(self),
        }
    }
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    StoredRow::read(row)?.decode().map_err(|bad| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unparseable timestamp: {}", bad.timestamp).into(),
        )
    })
}

/// Insert a record unless one with the same natural key exists.
///
/// Returns `true` when a row was created. An existing row, including its
/// delivery status, is left untouched.
pub fn insert_if_absent(conn: &Connection, record: &NewAttendanceRecord) -> DatabaseResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO attendance (device_user_id, timestamp, api_status)
         VALUES (?1, ?2, ?3)",
        params![
            record.subject_id,
            format_timestamp(&record.timestamp),
            DeliveryStatus::Pending,
        ],
    )?;

    if inserted == 0 {
        debug!(subject_id = %record.subject_id, timestamp = %record.timestamp, "Record already stored");
    }
    Ok(inserted > 0)
}

/// [`insert_if_absent`] for a whole batch inside one transaction.
///
/// Returns how many rows were created.
pub fn insert_many(conn: &Connection, records: &[NewAttendanceRecord]) -> DatabaseResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO attendance (device_user_id, timestamp, api_status)
             VALUES (?1, ?2, ?3)",
        )?;
        for record in records {
            inserted += stmt.execute(params![
                record.subject_id,
                format_timestamp(&record.timestamp),
                DeliveryStatus::Pending,
            ])?;
        }
    }
    tx.commit()?;

    debug!(offered = records.len(), inserted, "Stored record batch");
    Ok(inserted)
}

/// All pending records, oldest capture time first.
///
/// A row whose timestamp cannot be parsed is skipped with a warning so it
/// never holds back the rest of the outbox.
pub fn list_pending(conn: &Connection) -> DatabaseResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance
         WHERE api_status = ?1
         ORDER BY timestamp ASC, id ASC"
    ))?;

    let mut records = Vec::new();
    for row in stmt.query_map(params![DeliveryStatus::Pending], StoredRow::read)? {
        match row?.decode() {
            Ok(record) => records.push(record),
            Err(bad) => warn!(
                record_id = bad.record_id,
                subject_id = %bad.subject_id,
                timestamp = %bad.timestamp,
                error_class = "storage_failure",
                "Skipping pending record with unparseable timestamp"
            ),
        }
    }
    Ok(records)
}

/// Flag the record with `key` as delivered.
///
/// Returns `true` when a pending row changed. Marking an already delivered
/// or unknown key is a no-op.
pub fn mark_delivered(conn: &Connection, key: &NaturalKey) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE attendance SET api_status = ?1
         WHERE device_user_id = ?2 AND timestamp = ?3 AND api_status = ?4",
        params![
            DeliveryStatus::Delivered,
            key.subject_id,
            format_timestamp(&key.timestamp),
            DeliveryStatus::Pending,
        ],
    )?;
    Ok(updated > 0)
}

/// Look up a record by natural key.
pub fn find_by_key(conn: &Connection, key: &NaturalKey) -> DatabaseResult<Option<AttendanceRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance
         WHERE device_user_id = ?1 AND timestamp = ?2"
    ))?;

    let result = stmt.query_row(
        params![key.subject_id, format_timestamp(&key.timestamp)],
        map_record,
    );

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Count records by delivery status.
pub fn delivery_counts(conn: &Connection) -> DatabaseResult<DeliveryCounts> {
    let (pending, delivered): (i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN api_status = 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN api_status = 1 THEN 1 ELSE 0 END), 0)
         FROM attendance",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(DeliveryCounts {
        pending: pending.max(0) as u64,
        delivered: delivered.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::{NaiveDate, NaiveDateTime};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let conn = conn();
        let record = NewAttendanceRecord::new("A123", ts(1, 8, 0));

        assert!(insert_if_absent(&conn, &record).unwrap());
        assert!(!insert_if_absent(&conn, &record).unwrap());
        assert_eq!(list_pending(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_same_timestamp_different_subject() {
        let conn = conn();
        assert!(insert_if_absent(&conn, &NewAttendanceRecord::new("A", ts(1, 8, 0))).unwrap());
        assert!(insert_if_absent(&conn, &NewAttendanceRecord::new("B", ts(1, 8, 0))).unwrap());
        assert_eq!(list_pending(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_list_pending_orders_by_timestamp() {
        let conn = conn();
        insert_if_absent(&conn, &NewAttendanceRecord::new("late", ts(2, 9, 0))).unwrap();
        insert_if_absent(&conn, &NewAttendanceRecord::new("early", ts(1, 7, 30))).unwrap();
        insert_if_absent(&conn, &NewAttendanceRecord::new("mid", ts(1, 8, 0))).unwrap();

        let subjects: Vec<String> = list_pending(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.subject_id)
            .collect();
        assert_eq!(subjects, vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_mark_delivered_removes_from_pending() {
        let conn = conn();
        let key = NaturalKey::new("A123", ts(1, 8, 0));
        insert_if_absent(&conn, &NewAttendanceRecord::new("A123", ts(1, 8, 0))).unwrap();

        assert!(mark_delivered(&conn, &key).unwrap());
        assert!(list_pending(&conn).unwrap().is_empty());

        let stored = find_by_key(&conn, &key).unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_mark_delivered_twice_is_noop() {
        let conn = conn();
        let key = NaturalKey::new("A123", ts(1, 8, 0));
        insert_if_absent(&conn, &NewAttendanceRecord::new("A123", ts(1, 8, 0))).unwrap();

        assert!(mark_delivered(&conn, &key).unwrap());
        assert!(!mark_delivered(&conn, &key).unwrap());
    }

    #[test]
    fn test_mark_delivered_unknown_key() {
        let conn = conn();
        let key = NaturalKey::new("ghost", ts(1, 8, 0));
        assert!(!mark_delivered(&conn, &key).unwrap());
    }

    #[test]
    fn test_reinsert_after_delivery_keeps_status() {
        let conn = conn();
        let record = NewAttendanceRecord::new("A123", ts(1, 8, 0));
        let key = NaturalKey::new("A123", ts(1, 8, 0));
        insert_if_absent(&conn, &record).unwrap();
        mark_delivered(&conn, &key).unwrap();

        assert!(!insert_if_absent(&conn, &record).unwrap());
        assert_eq!(
            find_by_key(&conn, &key).unwrap().unwrap().delivery_status,
            DeliveryStatus::Delivered
        );
    }

    #[test]
    fn test_find_by_key_missing() {
        let conn = conn();
        assert!(find_by_key(&conn, &NaturalKey::new("x", ts(1, 8, 0)))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delivery_counts() {
        let conn = conn();
        assert_eq!(delivery_counts(&conn).unwrap(), DeliveryCounts::default());

        insert_if_absent(&conn, &NewAttendanceRecord::new("A", ts(1, 8, 0))).unwrap();
        insert_if_absent(&conn, &NewAttendanceRecord::new("B", ts(1, 9, 0))).unwrap();
        mark_delivered(&conn, &NaturalKey::new("A", ts(1, 8, 0))).unwrap();

        assert_eq!(
            delivery_counts(&conn).unwrap(),
            DeliveryCounts {
                pending: 1,
                delivered: 1
            }
        );
    }

    #[test]
    fn test_unparseable_row_does_not_block_the_rest() {
        let conn = conn();
        insert_if_absent(&conn, &NewAttendanceRecord::new("A", ts(1, 8, 0))).unwrap();
        conn.execute(
            "INSERT INTO attendance (device_user_id, timestamp) VALUES ('B', 'garbage')",
            [],
        )
        .unwrap();
        insert_if_absent(&conn, &NewAttendanceRecord::new("C", ts(1, 9, 0))).unwrap();

        let subjects: Vec<String> = list_pending(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.subject_id)
            .collect();
        assert_eq!(subjects, vec!["A", "C"]);
    }

    #[test]
    fn test_insert_many_skips_known_keys() {
        let conn = conn();
        insert_if_absent(&conn, &NewAttendanceRecord::new("A", ts(1, 8, 0))).unwrap();

        let batch = vec![
            NewAttendanceRecord::new("A", ts(1, 8, 0)),
            NewAttendanceRecord::new("B", ts(1, 8, 0)),
            NewAttendanceRecord::new("B", ts(1, 8, 0)),
            NewAttendanceRecord::new("C", ts(1, 9, 0)),
        ];

        assert_eq!(insert_many(&conn, &batch).unwrap(), 2);
        assert_eq!(insert_many(&conn, &batch).unwrap(), 0);
        assert_eq!(delivery_counts(&conn).unwrap().pending, 3);
    }

    #[test]
    fn test_insert_many_empty_batch() {
        let conn = conn();
        assert_eq!(insert_many(&conn, &[]).unwrap(), 0);
    }
}
