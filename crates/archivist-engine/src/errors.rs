//! Migration error model and retry backoff policy helpers.

use std::time::Duration;

use archivist_types::error::{ArchiveError, ErrorCategory};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 200;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// MigrationError — categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized migration error for retry decisions.
///
/// `Archive` wraps a typed `ArchiveError` from the record store, object
/// store, or codec, carrying its category and retry hints.
///
/// `Infrastructure` wraps opaque host-side errors (ledger backend, task
/// join failures, wiring) that are never retryable at the record level.
#[derive(Debug)]
pub enum MigrationError {
    /// Typed store/archive/codec error with retry metadata.
    Archive(ArchiveError),
    /// Infrastructure error (ledger, task panic, configuration, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<anyhow::Error> for MigrationError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ArchiveError> for MigrationError {
    fn from(e: ArchiveError) -> Self {
        Self::Archive(e)
    }
}

impl MigrationError {
    /// Returns `true` if this is a typed archive error marked as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Archive(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed archive error if this is an `Archive` variant.
    #[must_use]
    pub fn as_archive_error(&self) -> Option<&ArchiveError> {
        match self {
            Self::Archive(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    /// Error category, if typed.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.as_archive_error().map(|e| e.category)
    }

    /// `true` when the error means the requested record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.as_archive_error().is_some_and(ArchiveError::is_not_found)
    }
}

/// Bounded exponential backoff used for transient upload and store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

/// Compute retry delay based on error hints and attempt number.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub(crate) fn compute_backoff(policy: &RetryPolicy, err: &ArchiveError, attempt: u32) -> Duration {
    // If the store specified a retry_after, use it
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    policy
        .base_delay
        .saturating_mul(factor)
        .min(policy.max_delay)
}
