//! Attendance record model types.

use chrono::NaiveDateTime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage format of `attendance.timestamp`. Lexical order is chronological.
///
/// Lookups compare the stored text, so reads and writes must agree on this
/// exact form. Older layouts are rewritten to it by the v2 migration.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way it is stored and sent.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Only [`TIMESTAMP_FORMAT`] is accepted.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
}

/// Delivery status of an attendance record (`api_status` column).
///
/// Only ever moves from `Pending` to `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Delivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

impl ToSql for DeliveryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for DeliveryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        Self::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

/// Natural key of an attendance event: who punched, and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub subject_id: String,
    pub timestamp: NaiveDateTime,
}

impl NaturalKey {
    pub fn new(subject_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subject_id, format_timestamp(&self.timestamp))
    }
}

/// An attendance record persisted in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Surrogate key assigned on insertion.
    pub record_id: i64,
    /// Badge / user identifier as reported by the device.
    pub subject_id: String,
    /// Capture time on the device clock.
    pub timestamp: NaiveDateTime,
    pub delivery_status: DeliveryStatus,
}

impl AttendanceRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.subject_id.clone(), self.timestamp)
    }
}

/// Input for ingesting one device event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendanceRecord {
    pub subject_id: String,
    pub timestamp: NaiveDateTime,
}

impl NewAttendanceRecord {
    pub fn new(subject_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
        }
    }
}

/// Totals per delivery status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub pending: u64,
    pub delivered: u64,
}

impl DeliveryCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.delivered
    }
}
