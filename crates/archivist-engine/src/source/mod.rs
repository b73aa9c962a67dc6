//! Record store clients: the relational source of customer records.

use archivist_types::error::ArchiveError;
use archivist_types::record::{Record, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::classifier::CandidateFilter;

pub mod cursor;
pub mod memory;
pub mod postgres;

pub use cursor::RecordCursor;
pub use memory::MemoryRecordStore;
pub use postgres::PostgresRecordStore;

/// A row matched by a page query that could not be decoded into a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRow {
    pub id: RecordId,
    /// Present when the timestamp column itself decoded.
    pub last_modified: Option<DateTime<Utc>>,
    pub error: ArchiveError,
}

/// One row of a candidate page.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Record(Record),
    Malformed(MalformedRow),
}

impl Candidate {
    #[must_use]
    pub fn id(&self) -> RecordId {
        match self {
            Self::Record(record) => record.id,
            Self::Malformed(row) => row.id,
        }
    }

    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Malformed(_) => None,
        }
    }
}

impl From<Record> for Candidate {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

/// Read-only access to the relational record store.
///
/// Connection and query failures surface as `StoreUnavailable`; the caller
/// decides whether to retry. A row that cannot be decoded comes back as
/// [`Candidate::Malformed`] so one bad row never fails its page.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows matching `filter` with ids strictly greater than `after`,
    /// ascending by id, at most `limit` of them.
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, ArchiveError>;

    /// Point lookup by id. An undecodable row is a `Serialization` error.
    async fn get(&self, id: RecordId) -> Result<Option<Record>, ArchiveError>;
}
