//! Classification outcomes, policies, and candidate predicates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a record belongs right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Served from the relational store.
    Active,
    /// Eligible for archival to object storage.
    Legacy,
}

impl Classification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a record's activity is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPolicy {
    /// An explicit `is_active = false` is always legacy; otherwise the record
    /// is active only while `last_modified` is at or after the threshold.
    #[default]
    FlagAndAge,
    /// The flag is ignored; activity is derived from `last_modified` alone.
    AgeOnly,
}

/// Standing predicates supported by record stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Active,
    LegacyCandidate,
    /// Every row; the classifier is the only filter.
    All,
}

impl Predicate {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::LegacyCandidate => "legacy_candidate",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
