//! Migration run result types.

use archivist_types::error::ErrorCategory;
use archivist_types::record::RecordId;
use archivist_types::run::RunStatus;
use serde::Serialize;

/// Why a candidate was not uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The ledger already holds a success for this or a newer version.
    AlreadyMigrated,
    /// The record classified active.
    Active,
    /// The ledger rejected the commit because a newer success exists.
    Superseded,
}

/// Outcome of processing a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Succeeded {
        id: RecordId,
        bytes: u64,
        /// `false` when an identical object was already stored.
        uploaded: bool,
    },
    Failed(FailedRecord),
    Skipped {
        id: RecordId,
        reason: SkipReason,
    },
    /// Cancellation stopped the record before an outcome was committed.
    Interrupted { id: RecordId },
}

impl RecordOutcome {
    #[must_use]
    pub fn id(&self) -> RecordId {
        match self {
            Self::Succeeded { id, .. } | Self::Skipped { id, .. } | Self::Interrupted { id } => *id,
            Self::Failed(failed) => failed.id,
        }
    }
}

/// A record that failed in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub id: RecordId,
    pub category: ErrorCategory,
    pub message: String,
    pub attempts: u32,
}

/// Aggregate result of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub migration: String,
    pub run_id: i64,
    pub outcome: Option<RunStatus>,
    pub candidates: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub skipped_already_migrated: u64,
    pub skipped_active: u64,
    pub skipped_superseded: u64,
    pub interrupted: u64,
    pub uploads: u64,
    pub bytes_uploaded: u64,
    pub failures: Vec<FailedRecord>,
    pub resume_after: Option<RecordId>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub(crate) fn new(migration: impl Into<String>, run_id: i64) -> Self {
        Self {
            migration: migration.into(),
            run_id,
            ..Self::default()
        }
    }

    /// Fold one record outcome into the aggregate counts.
    pub(crate) fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Succeeded { bytes, uploaded, .. } => {
                self.succeeded += 1;
                if uploaded {
                    self.uploads += 1;
                    self.bytes_uploaded += bytes;
                }
            }
            RecordOutcome::Failed(failed) => {
                self.failed += 1;
                self.failures.push(failed);
            }
            RecordOutcome::Skipped { reason, .. } => {
                self.skipped += 1;
                match reason {
                    SkipReason::AlreadyMigrated => self.skipped_already_migrated += 1,
                    SkipReason::Active => self.skipped_active += 1,
                    SkipReason::Superseded => self.skipped_superseded += 1,
                }
            }
            RecordOutcome::Interrupted { .. } => self.interrupted += 1,
        }
    }

    /// Run status, defaulting to `Running` while the run is in flight.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.outcome.unwrap_or(RunStatus::Running)
    }

    /// Ids that failed in this run, ascending.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.failures.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Result of a component health check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckResult {
    pub source_ok: bool,
    pub archive_ok: bool,
    pub ledger_ok: bool,
    pub errors: Vec<String>,
}

impl CheckResult {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.source_ok && self.archive_ok && self.ledger_ok
    }
}
