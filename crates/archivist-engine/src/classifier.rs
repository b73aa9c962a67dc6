//! Record classification and in-memory candidate predicates.

use archivist_types::classification::{Classification, ClassificationPolicy, Predicate};
use archivist_types::record::Record;
use chrono::{DateTime, Utc};

/// Classify a record under the default flag-and-age policy.
///
/// An explicit `is_active = false` is always legacy. Otherwise the record is
/// active iff it was modified at or after `retention_threshold`.
#[must_use]
pub fn classify(record: &Record, retention_threshold: DateTime<Utc>) -> Classification {
    Classifier::new(ClassificationPolicy::FlagAndAge, retention_threshold).classify(record)
}

/// How the retention threshold is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Fixed cut-off.
    Threshold(DateTime<Utc>),
    /// Rolling window ending now.
    Days(u32),
}

impl Retention {
    /// Resolve the cut-off as of `now`. A window reaching past the earliest
    /// representable instant saturates there.
    #[must_use]
    pub fn threshold_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Threshold(threshold) => threshold,
            Self::Days(days) => now
                .checked_sub_signed(chrono::Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// A classification policy bound to a resolved retention threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    policy: ClassificationPolicy,
    threshold: DateTime<Utc>,
}

impl Classifier {
    #[must_use]
    pub fn new(policy: ClassificationPolicy, threshold: DateTime<Utc>) -> Self {
        Self { policy, threshold }
    }

    #[must_use]
    pub fn policy(&self) -> ClassificationPolicy {
        self.policy
    }

    #[must_use]
    pub fn threshold(&self) -> DateTime<Utc> {
        self.threshold
    }

    #[must_use]
    pub fn classify(&self, record: &Record) -> Classification {
        let explicitly_inactive = self.policy == ClassificationPolicy::FlagAndAge
            && record.is_active == Some(false);
        if explicitly_inactive || record.last_modified < self.threshold {
            Classification::Legacy
        } else {
            Classification::Active
        }
    }
}

/// A standing predicate together with the classifier whose terms it uses.
///
/// [`CandidateFilter::matches`] mirrors the SQL the Postgres record store
/// generates, so in-memory stores return the same rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFilter {
    pub predicate: Predicate,
    pub classifier: Classifier,
}

impl CandidateFilter {
    #[must_use]
    pub fn new(predicate: Predicate, classifier: Classifier) -> Self {
        Self {
            predicate,
            classifier,
        }
    }

    /// Candidates for archival under `classifier`.
    #[must_use]
    pub fn legacy_candidates(classifier: Classifier) -> Self {
        Self::new(Predicate::LegacyCandidate, classifier)
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let threshold = self.classifier.threshold;
        match (self.predicate, self.classifier.policy) {
            (Predicate::All, _) => true,
            // Flag-level only: rows past the threshold are still returned
            // and dropped by the classifier.
            (Predicate::Active, ClassificationPolicy::FlagAndAge) => {
                record.is_active.unwrap_or(true)
            }
            (Predicate::LegacyCandidate, ClassificationPolicy::FlagAndAge) => {
                record.is_active == Some(false) || record.last_modified < threshold
            }
            (Predicate::Active, ClassificationPolicy::AgeOnly) => record.last_modified >= threshold,
            (Predicate::LegacyCandidate, ClassificationPolicy::AgeOnly) => {
                record.last_modified < threshold
            }
        }
    }
}
