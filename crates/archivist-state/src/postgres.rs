//! `PostgreSQL`-backed implementation of [`LedgerBackend`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. The `postgres` crate drives its own internal runtime, so
//! async callers must reach it through `spawn_blocking`.

use std::sync::{Mutex, MutexGuard};

use archivist_types::ledger::{LedgerCommit, LedgerEntry, MigrationId, ResumeCursor};
use archivist_types::record::RecordId;
use archivist_types::run::{RunStats, RunStatus};
use chrono::Utc;
use postgres::{Client, NoTls, Row};

use crate::backend::LedgerBackend;
use crate::error::{self, LedgerError};
use crate::schema::{decode_ts, encode_ts, EntryRow, ENTRY_COLUMNS};

/// Idempotent DDL for ledger tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS migration_ledger (
    migration TEXT NOT NULL,
    record_id BIGINT NOT NULL,
    status TEXT NOT NULL,
    migrated_last_modified TEXT,
    attempted_last_modified TEXT NOT NULL,
    object_key TEXT,
    content_hash TEXT,
    error_category TEXT,
    error_message TEXT,
    attempts BIGINT NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (migration, record_id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_status ON migration_ledger (migration, status);

CREATE TABLE IF NOT EXISTS migration_runs (
    id BIGSERIAL PRIMARY KEY,
    migration TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    candidates BIGINT DEFAULT 0,
    succeeded BIGINT DEFAULT 0,
    failed BIGINT DEFAULT 0,
    skipped BIGINT DEFAULT 0,
    bytes_uploaded BIGINT DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS migration_cursors (
    migration TEXT PRIMARY KEY,
    after_record_id BIGINT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const COMMIT_SUCCEEDED: &str = "\
INSERT INTO migration_ledger (migration, record_id, status, migrated_last_modified, \
    attempted_last_modified, object_key, content_hash, error_category, error_message, \
    attempts, updated_at) \
VALUES ($1, $2, 'succeeded', $3, $3, $4, $5, NULL, NULL, 1, $6) \
ON CONFLICT (migration, record_id) DO UPDATE SET \
    status = 'succeeded', \
    migrated_last_modified = EXCLUDED.migrated_last_modified, \
    attempted_last_modified = EXCLUDED.attempted_last_modified, \
    object_key = EXCLUDED.object_key, \
    content_hash = EXCLUDED.content_hash, \
    error_category = NULL, \
    error_message = NULL, \
    attempts = migration_ledger.attempts + 1, \
    updated_at = EXCLUDED.updated_at \
WHERE migration_ledger.status <> 'succeeded' \
   OR migration_ledger.migrated_last_modified <= EXCLUDED.migrated_last_modified";

const COMMIT_FAILED: &str = "\
INSERT INTO migration_ledger (migration, record_id, status, migrated_last_modified, \
    attempted_last_modified, object_key, content_hash, error_category, error_message, \
    attempts, updated_at) \
VALUES ($1, $2, 'failed', NULL, $3, NULL, NULL, $4, $5, 1, $6) \
ON CONFLICT (migration, record_id) DO UPDATE SET \
    status = 'failed', \
    attempted_last_modified = EXCLUDED.attempted_last_modified, \
    error_category = EXCLUDED.error_category, \
    error_message = EXCLUDED.error_message, \
    attempts = migration_ledger.attempts + 1, \
    updated_at = EXCLUDED.updated_at \
WHERE migration_ledger.status <> 'succeeded' \
   OR migration_ledger.migrated_last_modified < EXCLUDED.attempted_last_modified";

/// `PostgreSQL`-backed ledger storage.
///
/// Create with [`PostgresLedgerBackend::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=archivist user=postgres"`).
pub struct PostgresLedgerBackend {
    client: Mutex<Client>,
}

impl PostgresLedgerBackend {
    /// Connect to a `PostgreSQL` database and initialize ledger tables.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Backend`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client =
            Client::connect(connstr, NoTls).map_err(|e| LedgerError::backend_context("connect", e))?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(|e| LedgerError::backend_context("create tables", e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn entry_row(row: &Row) -> EntryRow {
        EntryRow {
            record_id: row.get(0),
            status: row.get(1),
            migrated_last_modified: row.get(2),
            attempted_last_modified: row.get(3),
            object_key: row.get(4),
            content_hash: row.get(5),
            error_category: row.get(6),
            error_message: row.get(7),
            attempts: row.get(8),
            updated_at: row.get(9),
        }
    }
}

impl LedgerBackend for PostgresLedgerBackend {
    fn get_entry(&self, migration: &MigrationId, id: RecordId) -> error::Result<Option<LedgerEntry>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM migration_ledger \
                     WHERE migration = $1 AND record_id = $2"
                ),
                &[&migration.as_str(), &id.get()],
            )
            .map_err(|e| LedgerError::backend_context("get_entry", e))?;

        rows.first()
            .map(|row| Self::entry_row(row).into_entry())
            .transpose()
    }

    fn commit(
        &self,
        migration: &MigrationId,
        id: RecordId,
        commit: &LedgerCommit,
    ) -> error::Result<bool> {
        let mut client = self.lock_client()?;
        let now = encode_ts(Utc::now());
        let rows_affected = match commit {
            LedgerCommit::Succeeded {
                last_modified,
                object_key,
                content_hash,
            } => client.execute(
                COMMIT_SUCCEEDED,
                &[
                    &migration.as_str(),
                    &id.get(),
                    &encode_ts(*last_modified),
                    object_key,
                    content_hash,
                    &now,
                ],
            ),
            LedgerCommit::Failed {
                last_modified,
                category,
                message,
            } => client.execute(
                COMMIT_FAILED,
                &[
                    &migration.as_str(),
                    &id.get(),
                    &encode_ts(*last_modified),
                    &category.as_str(),
                    message,
                    &now,
                ],
            ),
        }
        .map_err(|e| LedgerError::backend_context("commit", e))?;
        Ok(rows_affected > 0)
    }

    fn list_failures(&self, migration: &MigrationId) -> error::Result<Vec<LedgerEntry>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM migration_ledger \
                     WHERE migration = $1 AND status = 'failed' ORDER BY record_id"
                ),
                &[&migration.as_str()],
            )
            .map_err(|e| LedgerError::backend_context("list_failures", e))?;

        rows.iter()
            .map(|row| Self::entry_row(row).into_entry())
            .collect()
    }

    fn get_resume_cursor(&self, migration: &MigrationId) -> error::Result<Option<ResumeCursor>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT after_record_id, updated_at FROM migration_cursors WHERE migration = $1",
                &[&migration.as_str()],
            )
            .map_err(|e| LedgerError::backend_context("get_resume_cursor", e))?;

        match rows.first() {
            Some(row) => {
                let after: i64 = row.get(0);
                let updated_at: String = row.get(1);
                Ok(Some(ResumeCursor {
                    after: RecordId::new(after),
                    updated_at: decode_ts(&updated_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn set_resume_cursor(&self, migration: &MigrationId, after: Option<RecordId>) -> error::Result<()> {
        let mut client = self.lock_client()?;
        match after {
            Some(after) => client.execute(
                "INSERT INTO migration_cursors (migration, after_record_id, updated_at) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (migration) DO UPDATE SET after_record_id = $2, updated_at = $3",
                &[&migration.as_str(), &after.get(), &encode_ts(Utc::now())],
            ),
            None => client.execute(
                "DELETE FROM migration_cursors WHERE migration = $1",
                &[&migration.as_str()],
            ),
        }
        .map_err(|e| LedgerError::backend_context("set_resume_cursor", e))?;
        Ok(())
    }

    fn start_run(&self, migration: &MigrationId) -> error::Result<i64> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "INSERT INTO migration_runs (migration, status, started_at) \
                 VALUES ($1, $2, $3) RETURNING id",
                &[
                    &migration.as_str(),
                    &RunStatus::Running.as_str(),
                    &encode_ts(Utc::now()),
                ],
            )
            .map_err(|e| LedgerError::backend_context("start_run", e))?;
        Ok(row.get(0))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let mut client = self.lock_client()?;
        client
            .execute(
                "UPDATE migration_runs SET status = $1, finished_at = $2, candidates = $3, \
                 succeeded = $4, failed = $5, skipped = $6, bytes_uploaded = $7, \
                 error_message = $8 WHERE id = $9",
                &[
                    &status.as_str(),
                    &encode_ts(Utc::now()),
                    &(stats.candidates as i64),
                    &(stats.succeeded as i64),
                    &(stats.failed as i64),
                    &(stats.skipped as i64),
                    &(stats.bytes_uploaded as i64),
                    &stats.error_message,
                    &run_id,
                ],
            )
            .map_err(|e| LedgerError::backend_context("complete_run", e))?;
        Ok(())
    }
}
