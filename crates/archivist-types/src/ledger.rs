//! Migration ledger model types.
//!
//! Pure data types used by `LedgerBackend` implementations. An id with no
//! ledger entry is pending: it has never been attempted, or its last attempt
//! was interrupted before an outcome was known.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::record::RecordId;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque migration identifier. Ledger entries, runs and resume cursors are
/// scoped to one migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MigrationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MigrationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

/// Committed outcome of the latest migration attempt for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Succeeded,
    Failed,
}

impl LedgerStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub record_id: RecordId,
    pub status: LedgerStatus,
    /// `last_modified` of the version currently held in object storage.
    /// Survives later failed attempts.
    pub migrated_last_modified: Option<DateTime<Utc>>,
    /// `last_modified` of the version the latest attempt tried to migrate.
    pub attempted_last_modified: DateTime<Utc>,
    pub object_key: Option<String>,
    /// Hex SHA-256 of the uploaded document.
    pub content_hash: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// `true` when the archived copy is at least as new as `last_modified`,
    /// so migrating again would be a no-op.
    #[must_use]
    pub fn covers(&self, last_modified: DateTime<Utc>) -> bool {
        self.status == LedgerStatus::Succeeded
            && self
                .migrated_last_modified
                .is_some_and(|migrated| migrated >= last_modified)
    }
}

/// Outcome to commit for one id.
///
/// Commits are conditional: a success never replaces a newer success, and a
/// failure never replaces a success at the same or a newer version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommit {
    Succeeded {
        last_modified: DateTime<Utc>,
        object_key: String,
        content_hash: String,
    },
    Failed {
        last_modified: DateTime<Utc>,
        category: ErrorCategory,
        message: String,
    },
}

impl LedgerCommit {
    #[must_use]
    pub fn status(&self) -> LedgerStatus {
        match self {
            Self::Succeeded { .. } => LedgerStatus::Succeeded,
            Self::Failed { .. } => LedgerStatus::Failed,
        }
    }

    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        match self {
            Self::Succeeded { last_modified, .. } | Self::Failed { last_modified, .. } => {
                *last_modified
            }
        }
    }
}

/// Persisted resume position for a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    /// Every candidate with an id at or below this one was settled.
    pub after: RecordId,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn entry(status: LedgerStatus, migrated: Option<DateTime<Utc>>) -> LedgerEntry {
        LedgerEntry {
            record_id: RecordId::new(1),
            status,
            migrated_last_modified: migrated,
            attempted_last_modified: ts(2023, 1, 1),
            object_key: None,
            content_hash: None,
            error_category: None,
            error_message: None,
            attempts: 1,
            updated_at: ts(2024, 1, 1),
        }
    }

    #[test]
    fn succeeded_entry_covers_equal_and_older_versions() {
        let e = entry(LedgerStatus::Succeeded, Some(ts(2023, 1, 1)));
        assert!(e.covers(ts(2023, 1, 1)));
        assert!(e.covers(ts(2022, 12, 31)));
        assert!(!e.covers(ts(2023, 1, 2)));
    }

    #[test]
    fn failed_entry_never_covers() {
        let e = entry(LedgerStatus::Failed, Some(ts(2023, 1, 1)));
        assert!(!e.covers(ts(2020, 1, 1)));
    }

    #[test]
    fn status_storage_form_roundtrips() {
        assert_eq!(LedgerStatus::parse("succeeded"), Some(LedgerStatus::Succeeded));
        assert_eq!(LedgerStatus::parse(LedgerStatus::Failed.as_str()), Some(LedgerStatus::Failed));
        assert_eq!(LedgerStatus::parse("pending"), None);
    }

    #[test]
    fn migration_id_serde_transparent() {
        let json = serde_json::to_string(&MigrationId::new("customers")).unwrap();
        assert_eq!(json, "\"customers\"");
    }
}
