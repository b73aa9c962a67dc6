//! Typed migration configuration, deserialized from YAML.

use std::path::PathBuf;
use std::time::Duration;

use archivist_types::classification::ClassificationPolicy;
use archivist_types::record::Record;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::archive::ExistingObjectPolicy;
use crate::classifier::Retention;
use crate::errors::RetryPolicy;

/// Top-level migration file.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub version: String,
    /// Migration name; scopes ledger entries, runs and the resume cursor.
    pub migration: String,
    pub source: SourceConfig,
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Postgres,
    /// Records listed inline under `records`.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Source column names for the fields the pipeline interprets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_last_modified_column")]
    pub last_modified: String,
    /// Explicit activity flag column; `null` when the table has none.
    #[serde(default = "default_active_column")]
    pub active: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            id: default_id_column(),
            last_modified: default_last_modified_column(),
            active: default_active_column(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_table() -> String {
    "customers".to_string()
}

fn default_page_size() -> usize {
    500
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_last_modified_column() -> String {
    "last_modified".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_active_column() -> Option<String> {
    Some("is_active".to_string())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Which rows a migration run walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanScope {
    /// Only rows matching the legacy-candidate predicate.
    #[default]
    Candidates,
    /// Every row; active rows are classified and reported as skipped.
    Full,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub policy: ClassificationPolicy,
    /// Absolute cut-off (RFC 3339).
    #[serde(default)]
    pub retention_threshold: Option<DateTime<Utc>>,
    /// Relative cut-off, resolved against the run start.
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub scan_scope: ScanScope,
}

impl ClassificationConfig {
    /// Resolve the retention threshold at `now`.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one of `retention_threshold` and
    /// `retention_days` is set.
    pub fn resolve_threshold(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        Ok(self.retention()?.threshold_at(now))
    }

    /// The configured retention rule.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one of `retention_threshold` and
    /// `retention_days` is set.
    pub fn retention(&self) -> anyhow::Result<Retention> {
        match (self.retention_threshold, self.retention_days) {
            (Some(threshold), None) => Ok(Retention::Threshold(threshold)),
            (None, Some(days)) => Ok(Retention::Days(days)),
            (Some(_), Some(_)) => {
                anyhow::bail!("retention_threshold and retention_days are mutually exclusive")
            }
            (None, None) => {
                anyhow::bail!("one of retention_threshold or retention_days must be set")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveBackendKind {
    #[default]
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub backend: ArchiveBackendKind,
    /// Directory holding containers (filesystem backend).
    /// Defaults to `~/.archivist/objects`.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_key_template")]
    pub key_template: String,
    #[serde(default)]
    pub existing_objects: ExistingObjectPolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackendKind::default(),
            root: None,
            container: default_container(),
            key_template: default_key_template(),
            existing_objects: ExistingObjectPolicy::default(),
        }
    }
}

impl ArchiveConfig {
    /// Directory of the configured container.
    #[must_use]
    pub fn container_dir(&self) -> PathBuf {
        let root = self
            .root
            .as_ref()
            .map_or_else(|| archivist_home().join("objects"), PathBuf::from);
        root.join(&self.container)
    }
}

fn default_container() -> String {
    "legacy-data".to_string()
}

fn default_key_template() -> String {
    "customer-{id}.json".to_string()
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackendKind,
    /// `SQLite` file path or `PostgreSQL` connection string.
    #[serde(default)]
    pub connection: Option<String>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Concurrent upload workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upload attempts per record, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive failed page fetches tolerated before giving up.
    #[serde(default = "default_max_store_failures")]
    pub max_consecutive_store_failures: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_consecutive_store_failures: default_max_store_failures(),
        }
    }
}

impl ResourceConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

fn default_workers() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_store_failures() -> u32 {
    5
}

/// `$HOME/.archivist`, falling back to `/tmp/.archivist`.
#[must_use]
pub fn archivist_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".archivist")
}
