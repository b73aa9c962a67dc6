//! Column encodings shared by the `SQLite` and `PostgreSQL` backends.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with nanosecond
//! precision, so lexicographic order in SQL matches chronological order and
//! no precision is lost between a record's `last_modified` and the ledger.

use archivist_types::error::ErrorCategory;
use archivist_types::ledger::{LedgerEntry, LedgerStatus};
use archivist_types::record::RecordId;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{self, LedgerError};

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(raw: &str) -> error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("invalid timestamp '{raw}': {e}")))
}

/// Raw column values of one `migration_ledger` row, in select order.
pub(crate) struct EntryRow {
    pub record_id: i64,
    pub status: String,
    pub migrated_last_modified: Option<String>,
    pub attempted_last_modified: String,
    pub object_key: Option<String>,
    pub content_hash: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub updated_at: String,
}

pub(crate) const ENTRY_COLUMNS: &str = "record_id, status, migrated_last_modified, \
     attempted_last_modified, object_key, content_hash, error_category, error_message, \
     attempts, updated_at";

impl EntryRow {
    pub(crate) fn into_entry(self) -> error::Result<LedgerEntry> {
        let status = LedgerStatus::parse(&self.status)
            .ok_or_else(|| LedgerError::Corrupt(format!("unknown status '{}'", self.status)))?;
        let error_category = self
            .error_category
            .as_deref()
            .map(|raw| {
                ErrorCategory::parse(raw)
                    .ok_or_else(|| LedgerError::Corrupt(format!("unknown error category '{raw}'")))
            })
            .transpose()?;
        Ok(LedgerEntry {
            record_id: RecordId::new(self.record_id),
            status,
            migrated_last_modified: self
                .migrated_last_modified
                .as_deref()
                .map(decode_ts)
                .transpose()?,
            attempted_last_modified: decode_ts(&self.attempted_last_modified)?,
            object_key: self.object_key,
            content_hash: self.content_hash,
            error_category,
            error_message: self.error_message,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let b = a + chrono::Duration::nanoseconds(1);
        let c = Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap();
        assert!(encode_ts(a) < encode_ts(b));
        assert!(encode_ts(b) < encode_ts(c));
    }

    #[test]
    fn timestamp_roundtrip_is_lossless() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 45).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(decode_ts(&encode_ts(ts)).unwrap(), ts);
    }

    #[test]
    fn invalid_timestamp_is_corrupt() {
        let err = decode_ts("yesterday").unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let row = EntryRow {
            record_id: 1,
            status: "uploading".into(),
            migrated_last_modified: None,
            attempted_last_modified: "2023-01-01T00:00:00.000000000Z".into(),
            object_key: None,
            content_hash: None,
            error_category: None,
            error_message: None,
            attempts: 1,
            updated_at: "2023-01-01T00:00:00.000000000Z".into(),
        };
        assert!(matches!(row.into_entry(), Err(LedgerError::Corrupt(_))));
    }
}
