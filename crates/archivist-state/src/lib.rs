//! Migration ledger persistence for archivist.
//!
//! Provides the [`LedgerBackend`] trait with `SQLite` and `PostgreSQL`
//! implementations for per-record migration outcomes, run history, and
//! resume cursors.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
mod schema;
pub mod sqlite;

pub use backend::LedgerBackend;
pub use error::LedgerError;
pub use postgres::PostgresLedgerBackend;
pub use sqlite::SqliteLedgerBackend;

/// Common imports for ledger consumers.
pub mod prelude {
    pub use crate::backend::LedgerBackend;
    pub use crate::error::LedgerError;
    pub use crate::postgres::PostgresLedgerBackend;
    pub use crate::sqlite::SqliteLedgerBackend;
    pub use archivist_types::ledger::{LedgerCommit, LedgerEntry, LedgerStatus, MigrationId, ResumeCursor};
    pub use archivist_types::record::RecordId;
    pub use archivist_types::run::{RunStats, RunStatus};
}
