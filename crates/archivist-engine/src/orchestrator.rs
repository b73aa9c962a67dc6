//! Migration orchestrator: candidate scan, ledger check, classification and
//! bounded-concurrency upload with per-record outcomes.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use archivist_state::LedgerBackend;
use archivist_types::classification::{Classification, Predicate};
use archivist_types::error::{ArchiveError, ErrorCategory};
use archivist_types::ledger::{LedgerCommit, LedgerEntry, MigrationId};
use archivist_types::record::{Record, RecordId};
use archivist_types::run::{RunStats, RunStatus};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveGateway, PutOutcome};
use crate::checkpoint::{self, ResumeTracker};
use crate::classifier::{CandidateFilter, Classifier};
use crate::codec::DocumentCodec;
use crate::config::types::ScanScope;
use crate::errors::{compute_backoff, MigrationError, RetryPolicy};
use crate::locks::IdLocks;
use crate::result::{FailedRecord, RecordOutcome, RunSummary, SkipReason};
use crate::source::{Candidate, MalformedRow, RecordCursor, RecordStore};

const DEFAULT_PAGE_SIZE: usize = 500;
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_MAX_STORE_FAILURES: u32 = 5;

/// Per-run execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore the persisted resume watermark and scan from the first id.
    pub from_start: bool,
}

/// Drives one migration over injected store, archive and ledger handles.
///
/// Cheap to share behind an `Arc`; every call to [`Orchestrator::run`] is an
/// independent run recorded in the ledger.
pub struct Orchestrator {
    migration: MigrationId,
    store: Arc<dyn RecordStore>,
    gateway: ArchiveGateway,
    ledger: Arc<dyn LedgerBackend>,
    classifier: Classifier,
    scan_scope: ScanScope,
    page_size: usize,
    workers: usize,
    retry: RetryPolicy,
    max_store_failures: u32,
    codec: DocumentCodec,
    locks: IdLocks,
    options: RunOptions,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        migration: MigrationId,
        store: Arc<dyn RecordStore>,
        gateway: ArchiveGateway,
        ledger: Arc<dyn LedgerBackend>,
        classifier: Classifier,
    ) -> Self {
        Self {
            migration,
            store,
            gateway,
            ledger,
            classifier,
            scan_scope: ScanScope::default(),
            page_size: DEFAULT_PAGE_SIZE,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            max_store_failures: DEFAULT_MAX_STORE_FAILURES,
            codec: DocumentCodec,
            locks: IdLocks::new(),
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_scan_scope(mut self, scan_scope: ScanScope) -> Self {
        self.scan_scope = scan_scope;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_max_store_failures(mut self, max: u32) -> Self {
        self.max_store_failures = max.max(1);
        self
    }

    /// Share per-id locks with other orchestrators in this process.
    #[must_use]
    pub fn with_locks(mut self, locks: IdLocks) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn migration(&self) -> &MigrationId {
        &self.migration
    }

    #[must_use]
    pub fn classifier(&self) -> Classifier {
        self.classifier
    }

    fn candidate_filter(&self) -> CandidateFilter {
        let predicate = match self.scan_scope {
            ScanScope::Candidates => Predicate::LegacyCandidate,
            ScanScope::Full => Predicate::All,
        };
        CandidateFilter::new(predicate, self.classifier)
    }

    /// Run one migration pass.
    ///
    /// Per-record failures are contained in the returned summary. Cancelling
    /// `cancel` stops dispatch; in-flight uploads finish and commit, and
    /// records that had not started an attempt are left for the next run.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Archive` when the first page of candidates
    /// cannot be read, and `MigrationError::Infrastructure` when the ledger
    /// fails. Both cases are recorded as a failed run where possible.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, MigrationError> {
        let start = Instant::now();

        let ledger = self.ledger.clone();
        let migration = self.migration.clone();
        let run_id = blocking("start_run", move || Ok(ledger.start_run(&migration)?)).await?;

        let resume_from = if self.options.from_start {
            None
        } else {
            let ledger = self.ledger.clone();
            let migration = self.migration.clone();
            blocking("load_resume_point", move || {
                checkpoint::load_resume_point(ledger.as_ref(), &migration)
            })
            .await?
        };

        tracing::info!(
            migration = self.migration.as_str(),
            run_id,
            policy = ?self.classifier.policy(),
            threshold = %self.classifier.threshold(),
            scan_scope = ?self.scan_scope,
            workers = self.workers,
            resume_after = resume_from.map(RecordId::get),
            "Migration run started"
        );

        let mut summary = RunSummary::new(self.migration.as_str(), run_id);
        let mut tracker = ResumeTracker::new(resume_from);
        let mut cursor = RecordCursor::new(self.store.clone(), self.candidate_filter(), self.page_size);
        if let Some(after) = resume_from {
            cursor = cursor.resume_after(after);
        }

        let worker = Worker {
            migration: self.migration.clone(),
            gateway: self.gateway.clone(),
            ledger: self.ledger.clone(),
            codec: self.codec,
            locks: self.locks.clone(),
            retry: self.retry,
            cancel: cancel.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<(RecordId, Result<RecordOutcome, MigrationError>)> =
            JoinSet::new();
        let mut stop: Option<Stop> = None;

        loop {
            while let Some(joined) = join_set.try_join_next() {
                settle_joined(joined, &mut summary, &mut tracker, &mut stop);
            }
            if stop.is_some() {
                break;
            }

            let candidate = match self.next_candidate(&mut cursor, &cancel).await {
                Next::Candidate(candidate) => candidate,
                Next::Exhausted => break,
                Next::Cancelled => {
                    stop = Some(Stop::Cancelled);
                    break;
                }
                Next::StoreFailed(err) => {
                    stop = Some(Stop::Store {
                        err,
                        first_page: cursor.pages_fetched() == 0,
                    });
                    break;
                }
            };

            let id = candidate.id();
            summary.candidates += 1;
            tracker.observe(id);

            let record = match candidate {
                Candidate::Record(record) => record,
                Candidate::Malformed(row) => match worker.reject_malformed(row).await {
                    Ok(outcome) => {
                        apply(outcome, &mut summary, &mut tracker);
                        continue;
                    }
                    Err(err) => {
                        tracker.pin(id);
                        stop = Some(Stop::Infrastructure(err));
                        break;
                    }
                },
            };

            let ledger = self.ledger.clone();
            let migration = self.migration.clone();
            let entry = blocking("get_entry", move || Ok(ledger.get_entry(&migration, id)?)).await;
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracker.pin(id);
                    stop = Some(Stop::Infrastructure(err));
                    break;
                }
            };

            if let Some(reason) = self.skip_reason(&record, entry.as_ref()) {
                tracing::debug!(
                    migration = self.migration.as_str(),
                    id = id.get(),
                    reason = ?reason,
                    "Record skipped"
                );
                apply(RecordOutcome::Skipped { id, reason }, &mut summary, &mut tracker);
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                () = cancel.cancelled() => {
                    apply(RecordOutcome::Interrupted { id }, &mut summary, &mut tracker);
                    stop = Some(Stop::Cancelled);
                    break;
                }
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    tracker.pin(id);
                    stop = Some(Stop::Infrastructure(MigrationError::Infrastructure(anyhow!(
                        "Worker semaphore closed: {e}"
                    ))));
                    break;
                }
            };

            let worker = worker.clone();
            join_set.spawn(async move {
                let _permit = permit;
                (id, worker.process(record).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            settle_joined(joined, &mut summary, &mut tracker, &mut stop);
        }

        summary.resume_after = tracker.watermark();
        summary.duration_secs = start.elapsed().as_secs_f64();
        self.finalize(summary, stop).await
    }

    fn skip_reason(&self, record: &Record, entry: Option<&LedgerEntry>) -> Option<SkipReason> {
        if entry.is_some_and(|entry| entry.covers(record.last_modified)) {
            return Some(SkipReason::AlreadyMigrated);
        }
        if self.classifier.classify(record) == Classification::Active {
            return Some(SkipReason::Active);
        }
        None
    }

    /// Pull the next candidate, retrying failed page fetches with backoff.
    async fn next_candidate(&self, cursor: &mut RecordCursor, cancel: &CancellationToken) -> Next {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Next::Cancelled;
            }
            let err = match cursor.next().await {
                Ok(Some(candidate)) => return Next::Candidate(candidate),
                Ok(None) => return Next::Exhausted,
                Err(err) => err,
            };

            failures += 1;
            if !err.retryable || failures >= self.max_store_failures {
                tracing::error!(
                    migration = self.migration.as_str(),
                    failures,
                    category = %err.category,
                    code = err.code.as_str(),
                    position = cursor.position().map(RecordId::get),
                    "Record store unavailable, giving up"
                );
                return Next::StoreFailed(err);
            }

            let delay = compute_backoff(&self.retry, &err, failures);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::warn!(
                migration = self.migration.as_str(),
                failures,
                max_failures = self.max_store_failures,
                delay_ms,
                code = err.code.as_str(),
                "Record store fetch failed, will retry"
            );
            tokio::select! {
                () = cancel.cancelled() => return Next::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn finalize(
        &self,
        mut summary: RunSummary,
        stop: Option<Stop>,
    ) -> Result<RunSummary, MigrationError> {
        let (status, failure) = match stop {
            None if summary.interrupted > 0 => (RunStatus::Cancelled, None),
            None => (RunStatus::Completed, None),
            Some(Stop::Cancelled) => (RunStatus::Cancelled, None),
            Some(Stop::Store { err, first_page: false }) => {
                summary.error = Some(err.to_string());
                (RunStatus::Aborted, None)
            }
            Some(Stop::Store { err, first_page: true }) => {
                (RunStatus::Failed, Some(MigrationError::Archive(err)))
            }
            Some(Stop::Infrastructure(err)) => (RunStatus::Failed, Some(err)),
        };
        summary.outcome = Some(status);

        if let Some(err) = failure {
            summary.error = Some(err.to_string());
            tracing::error!(
                migration = self.migration.as_str(),
                run_id = summary.run_id,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Migration run failed: {err}"
            );
            let ledger = self.ledger.clone();
            let run_id = summary.run_id;
            let stats = run_stats(&summary);
            if let Err(complete_err) = blocking("complete_run", move || {
                Ok(ledger.complete_run(run_id, RunStatus::Failed, &stats)?)
            })
            .await
            {
                tracing::warn!(run_id, "Could not record failed run: {complete_err}");
            }
            return Err(err);
        }

        let resume_point = match status {
            RunStatus::Completed => None,
            _ => summary.resume_after,
        };
        let ledger = self.ledger.clone();
        let migration = self.migration.clone();
        blocking("persist_resume_point", move || {
            checkpoint::persist_resume_point(ledger.as_ref(), &migration, resume_point)
        })
        .await?;

        let ledger = self.ledger.clone();
        let run_id = summary.run_id;
        let stats = run_stats(&summary);
        blocking("complete_run", move || Ok(ledger.complete_run(run_id, status, &stats)?)).await?;

        tracing::info!(
            migration = self.migration.as_str(),
            run_id = summary.run_id,
            outcome = %status,
            candidates = summary.candidates,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            uploads = summary.uploads,
            bytes_uploaded = summary.bytes_uploaded,
            duration_secs = summary.duration_secs,
            "Migration run finished"
        );
        Ok(summary)
    }
}

enum Next {
    Candidate(Candidate),
    Exhausted,
    Cancelled,
    StoreFailed(ArchiveError),
}

/// Why dispatch stopped before the candidate sequence was exhausted.
enum Stop {
    Cancelled,
    Store { err: ArchiveError, first_page: bool },
    Infrastructure(MigrationError),
}

fn run_stats(summary: &RunSummary) -> RunStats {
    RunStats {
        candidates: summary.candidates,
        succeeded: summary.succeeded,
        failed: summary.failed,
        skipped: summary.skipped,
        bytes_uploaded: summary.bytes_uploaded,
        error_message: summary.error.clone(),
    }
}

fn apply(outcome: RecordOutcome, summary: &mut RunSummary, tracker: &mut ResumeTracker) {
    match &outcome {
        RecordOutcome::Succeeded { id, .. } | RecordOutcome::Skipped { id, .. } => {
            tracker.settle(*id);
        }
        RecordOutcome::Failed(failed) => tracker.pin(failed.id),
        RecordOutcome::Interrupted { id } => tracker.pin(*id),
    }
    summary.record(outcome);
}

fn settle_joined(
    joined: Result<(RecordId, Result<RecordOutcome, MigrationError>), tokio::task::JoinError>,
    summary: &mut RunSummary,
    tracker: &mut ResumeTracker,
    stop: &mut Option<Stop>,
) {
    match joined {
        Ok((_, Ok(outcome))) => apply(outcome, summary, tracker),
        Ok((id, Err(err))) => {
            tracing::error!(id = id.get(), "Record task failed: {err}");
            tracker.pin(id);
            if !matches!(stop, Some(Stop::Infrastructure(_))) {
                *stop = Some(Stop::Infrastructure(err));
            }
        }
        Err(join_err) => {
            // The id stays in flight, which holds the watermark below it.
            tracing::error!("Record task panicked: {join_err}");
            if !matches!(stop, Some(Stop::Infrastructure(_))) {
                *stop = Some(Stop::Infrastructure(MigrationError::Infrastructure(anyhow!(
                    "Record task panicked: {join_err}"
                ))));
            }
        }
    }
}

/// Upload-and-commit for one record, run on the worker pool.
#[derive(Clone)]
struct Worker {
    migration: MigrationId,
    gateway: ArchiveGateway,
    ledger: Arc<dyn LedgerBackend>,
    codec: DocumentCodec,
    locks: IdLocks,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Worker {
    async fn process(&self, record: Record) -> Result<RecordOutcome, MigrationError> {
        let id = record.id;
        let _guard = self.locks.lock(id).await;

        let body = match self.codec.encode(&record) {
            Ok(body) => body,
            Err(err) => return self.fail(id, record.last_modified, err, 1).await,
        };
        let content_hash = DocumentCodec::content_hash(&body);
        let key = self.gateway.key_for(id);

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(id = id.get(), attempt, "Upload interrupted before attempt");
                return Ok(RecordOutcome::Interrupted { id });
            }
            attempt += 1;

            match self.gateway.put(id, body.clone()).await {
                Ok(put) => {
                    let commit = LedgerCommit::Succeeded {
                        last_modified: record.last_modified,
                        object_key: key.clone(),
                        content_hash: content_hash.clone(),
                    };
                    if !self.commit(id, commit).await? {
                        return Ok(self.superseded(id));
                    }
                    tracing::debug!(
                        migration = self.migration.as_str(),
                        id = id.get(),
                        key = key.as_str(),
                        attempt,
                        unchanged = put == PutOutcome::Unchanged,
                        "Record archived"
                    );
                    return Ok(RecordOutcome::Succeeded {
                        id,
                        bytes: body.len() as u64,
                        uploaded: put == PutOutcome::Uploaded,
                    });
                }
                Err(err) if err.retryable && attempt < self.retry.max_attempts => {
                    let delay = compute_backoff(&self.retry, &err, attempt);
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        migration = self.migration.as_str(),
                        id = id.get(),
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms,
                        category = %err.category,
                        code = err.code.as_str(),
                        "Upload failed, will retry"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::debug!(id = id.get(), attempt, "Upload interrupted during backoff");
                            return Ok(RecordOutcome::Interrupted { id });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return self.fail(id, record.last_modified, err, attempt).await,
            }
        }
    }

    /// Record an undecodable row as failed without touching the archive.
    async fn reject_malformed(&self, row: MalformedRow) -> Result<RecordOutcome, MigrationError> {
        let _guard = self.locks.lock(row.id).await;
        // No readable version: stamp the failure with the current time.
        let last_modified = row.last_modified.unwrap_or_else(Utc::now);
        self.fail(row.id, last_modified, row.error, 1).await
    }

    async fn fail(
        &self,
        id: RecordId,
        last_modified: DateTime<Utc>,
        err: ArchiveError,
        attempts: u32,
    ) -> Result<RecordOutcome, MigrationError> {
        if err.category == ErrorCategory::Permanent {
            tracing::error!(
                migration = self.migration.as_str(),
                id = id.get(),
                attempts,
                code = err.code.as_str(),
                "Permanent archive failure, operator attention required: {}",
                err.message
            );
        } else {
            tracing::warn!(
                migration = self.migration.as_str(),
                id = id.get(),
                attempts,
                category = %err.category,
                code = err.code.as_str(),
                "Record failed: {}",
                err.message
            );
        }

        let commit = LedgerCommit::Failed {
            last_modified,
            category: err.category,
            message: err.to_string(),
        };
        if !self.commit(id, commit).await? {
            return Ok(self.superseded(id));
        }
        Ok(RecordOutcome::Failed(FailedRecord {
            id,
            category: err.category,
            message: err.to_string(),
            attempts,
        }))
    }

    fn superseded(&self, id: RecordId) -> RecordOutcome {
        tracing::warn!(
            migration = self.migration.as_str(),
            id = id.get(),
            "Ledger already holds a newer success, commit rejected"
        );
        RecordOutcome::Skipped {
            id,
            reason: SkipReason::Superseded,
        }
    }

    async fn commit(&self, id: RecordId, commit: LedgerCommit) -> Result<bool, MigrationError> {
        let ledger = self.ledger.clone();
        let migration = self.migration.clone();
        blocking("commit", move || Ok(ledger.commit(&migration, id, &commit)?)).await
    }
}

/// Run a blocking ledger call off the async runtime.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, MigrationError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MigrationError::Infrastructure(anyhow!("{what} task panicked: {e}")))?
        .map_err(MigrationError::Infrastructure)
}
