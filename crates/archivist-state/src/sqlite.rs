//! `SQLite`-backed implementation of [`LedgerBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use archivist_types::ledger::{LedgerCommit, LedgerEntry, MigrationId, ResumeCursor};
use archivist_types::record::RecordId;
use archivist_types::run::{RunStats, RunStatus};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::backend::LedgerBackend;
use crate::error::{self, LedgerError};
use crate::schema::{decode_ts, encode_ts, EntryRow, ENTRY_COLUMNS};

/// Idempotent DDL for ledger tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS migration_ledger (
    migration TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    migrated_last_modified TEXT,
    attempted_last_modified TEXT NOT NULL,
    object_key TEXT,
    content_hash TEXT,
    error_category TEXT,
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (migration, record_id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_status ON migration_ledger (migration, status);

CREATE TABLE IF NOT EXISTS migration_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    candidates INTEGER DEFAULT 0,
    succeeded INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    skipped INTEGER DEFAULT 0,
    bytes_uploaded INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS migration_cursors (
    migration TEXT PRIMARY KEY,
    after_record_id INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const COMMIT_SUCCEEDED: &str = "\
INSERT INTO migration_ledger (migration, record_id, status, migrated_last_modified, \
    attempted_last_modified, object_key, content_hash, error_category, error_message, \
    attempts, updated_at) \
VALUES (?1, ?2, 'succeeded', ?3, ?3, ?4, ?5, NULL, NULL, 1, ?6) \
ON CONFLICT(migration, record_id) DO UPDATE SET \
    status = 'succeeded', \
    migrated_last_modified = excluded.migrated_last_modified, \
    attempted_last_modified = excluded.attempted_last_modified, \
    object_key = excluded.object_key, \
    content_hash = excluded.content_hash, \
    error_category = NULL, \
    error_message = NULL, \
    attempts = migration_ledger.attempts + 1, \
    updated_at = excluded.updated_at \
WHERE migration_ledger.status <> 'succeeded' \
   OR migration_ledger.migrated_last_modified <= excluded.migrated_last_modified";

const COMMIT_FAILED: &str = "\
INSERT INTO migration_ledger (migration, record_id, status, migrated_last_modified, \
    attempted_last_modified, object_key, content_hash, error_category, error_message, \
    attempts, updated_at) \
VALUES (?1, ?2, 'failed', NULL, ?3, NULL, NULL, ?4, ?5, 1, ?6) \
ON CONFLICT(migration, record_id) DO UPDATE SET \
    status = 'failed', \
    attempted_last_modified = excluded.attempted_last_modified, \
    error_category = excluded.error_category, \
    error_message = excluded.error_message, \
    attempts = migration_ledger.attempts + 1, \
    updated_at = excluded.updated_at \
WHERE migration_ledger.status <> 'succeeded' \
   OR migration_ledger.migrated_last_modified < excluded.attempted_last_modified";

/// `SQLite`-backed ledger storage.
///
/// Create with [`SqliteLedgerBackend::open`] for file-backed persistence
/// or [`SqliteLedgerBackend::in_memory`] for tests.
pub struct SqliteLedgerBackend {
    conn: Mutex<Connection>,
}

impl SqliteLedgerBackend {
    /// Open or create a `SQLite` ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the directory can't be created,
    /// or [`LedgerError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| LedgerError::backend_context("open", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LedgerError::backend_context("open", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| LedgerError::backend_context("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
        Ok(EntryRow {
            record_id: row.get(0)?,
            status: row.get(1)?,
            migrated_last_modified: row.get(2)?,
            attempted_last_modified: row.get(3)?,
            object_key: row.get(4)?,
            content_hash: row.get(5)?,
            error_category: row.get(6)?,
            error_message: row.get(7)?,
            attempts: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    #[cfg(test)]
    fn get_run_row(&self, run_id: i64) -> error::Result<(String, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT status, succeeded, finished_at, error_message FROM migration_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(LedgerError::backend)
    }
}

impl LedgerBackend for SqliteLedgerBackend {
    fn get_entry(&self, migration: &MigrationId, id: RecordId) -> error::Result<Option<LedgerEntry>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM migration_ledger \
                     WHERE migration = ?1 AND record_id = ?2"
                ),
                rusqlite::params![migration.as_str(), id.get()],
                Self::read_entry_row,
            )
            .optional()
            .map_err(|e| LedgerError::backend_context("get_entry", e))?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn commit(
        &self,
        migration: &MigrationId,
        id: RecordId,
        commit: &LedgerCommit,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let now = encode_ts(Utc::now());
        let rows_affected = match commit {
            LedgerCommit::Succeeded {
                last_modified,
                object_key,
                content_hash,
            } => conn.execute(
                COMMIT_SUCCEEDED,
                rusqlite::params![
                    migration.as_str(),
                    id.get(),
                    encode_ts(*last_modified),
                    object_key,
                    content_hash,
                    now,
                ],
            ),
            LedgerCommit::Failed {
                last_modified,
                category,
                message,
            } => conn.execute(
                COMMIT_FAILED,
                rusqlite::params![
                    migration.as_str(),
                    id.get(),
                    encode_ts(*last_modified),
                    category.as_str(),
                    message,
                    now,
                ],
            ),
        }
        .map_err(|e| LedgerError::backend_context("commit", e))?;
        Ok(rows_affected > 0)
    }

    fn list_failures(&self, migration: &MigrationId) -> error::Result<Vec<LedgerEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM migration_ledger \
                 WHERE migration = ?1 AND status = 'failed' ORDER BY record_id"
            ))
            .map_err(|e| LedgerError::backend_context("list_failures: prepare", e))?;
        let rows = stmt
            .query_map([migration.as_str()], Self::read_entry_row)
            .map_err(|e| LedgerError::backend_context("list_failures: query", e))?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| LedgerError::backend_context("list_failures: row", e))?;
            entries.push(row.into_entry()?);
        }
        Ok(entries)
    }

    fn get_resume_cursor(&self, migration: &MigrationId) -> error::Result<Option<ResumeCursor>> {
        let conn = self.lock_conn()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT after_record_id, updated_at FROM migration_cursors WHERE migration = ?1",
                [migration.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| LedgerError::backend_context("get_resume_cursor", e))?;

        row.map(|(after, updated_at)| {
            Ok(ResumeCursor {
                after: RecordId::new(after),
                updated_at: decode_ts(&updated_at)?,
            })
        })
        .transpose()
    }

    fn set_resume_cursor(&self, migration: &MigrationId, after: Option<RecordId>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        match after {
            Some(after) => conn.execute(
                "INSERT INTO migration_cursors (migration, after_record_id, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(migration) DO UPDATE SET after_record_id = ?2, updated_at = ?3",
                rusqlite::params![migration.as_str(), after.get(), encode_ts(Utc::now())],
            ),
            None => conn.execute(
                "DELETE FROM migration_cursors WHERE migration = ?1",
                [migration.as_str()],
            ),
        }
        .map_err(|e| LedgerError::backend_context("set_resume_cursor", e))?;
        Ok(())
    }

    fn start_run(&self, migration: &MigrationId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_runs (migration, status, started_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.as_str(),
                RunStatus::Running.as_str(),
                encode_ts(Utc::now())
            ],
        )
        .map_err(|e| LedgerError::backend_context("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE migration_runs SET status = ?1, finished_at = ?2, candidates = ?3, \
             succeeded = ?4, failed = ?5, skipped = ?6, bytes_uploaded = ?7, error_message = ?8 \
             WHERE id = ?9",
            rusqlite::params![
                status.as_str(),
                encode_ts(Utc::now()),
                stats.candidates as i64,
                stats.succeeded as i64,
                stats.failed as i64,
                stats.skipped as i64,
                stats.bytes_uploaded as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(|e| LedgerError::backend_context("complete_run", e))?;
        Ok(())
    }
}
