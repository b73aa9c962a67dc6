//! Ledger backend trait definition.
//!
//! [`LedgerBackend`] defines the storage contract for per-record migration
//! outcomes, run history, and resume cursors. Model types live in
//! [`archivist_types::ledger`] and [`archivist_types::run`].

use archivist_types::ledger::{LedgerCommit, LedgerEntry, MigrationId, ResumeCursor};
use archivist_types::record::RecordId;
use archivist_types::run::{RunStats, RunStatus};

use crate::error;

/// Storage contract for the migration ledger.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn LedgerBackend>`.
/// Calls are blocking; async callers go through `spawn_blocking`.
pub trait LedgerBackend: Send + Sync {
    /// Read the ledger entry for one record.
    ///
    /// Returns `Ok(None)` when the record has never reached an outcome.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn get_entry(&self, migration: &MigrationId, id: RecordId) -> error::Result<Option<LedgerEntry>>;

    /// Conditionally commit an outcome for one record.
    ///
    /// A success is applied unless the ledger already holds a success for a
    /// newer `last_modified`. A failure is applied unless the ledger already
    /// holds a success for the same or a newer `last_modified`. Returns
    /// `true` if the row was written.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn commit(
        &self,
        migration: &MigrationId,
        id: RecordId,
        commit: &LedgerCommit,
    ) -> error::Result<bool>;

    /// List entries currently in the failed state, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn list_failures(&self, migration: &MigrationId) -> error::Result<Vec<LedgerEntry>>;

    /// Read the persisted resume cursor, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn get_resume_cursor(&self, migration: &MigrationId) -> error::Result<Option<ResumeCursor>>;

    /// Upsert the resume cursor, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn set_resume_cursor(&self, migration: &MigrationId, after: Option<RecordId>) -> error::Result<()>;

    /// Begin a new migration run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn start_run(&self, migration: &MigrationId) -> error::Result<i64>;

    /// Finalize a migration run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`](crate::error::LedgerError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;
}
