//! The unit of migration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, never-reused record identifier.
///
/// Ordered so candidate sequences can be paged by `id` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// A customer record as read from the relational source.
///
/// Business columns (`name`, `email`, `data`, ...) are carried as an opaque,
/// ordered attribute bag. Only `id`, `last_modified` and `is_active` are
/// interpreted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub last_modified: DateTime<Utc>,
    /// Explicit activity flag. `None` when the source has no flag column and
    /// activity is derived from `last_modified` alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Record {
    #[must_use]
    pub fn new(id: impl Into<RecordId>, last_modified: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            last_modified,
            is_active: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_id_orders_numerically() {
        let mut ids = vec![RecordId::new(10), RecordId::new(2), RecordId::new(-1)];
        ids.sort();
        assert_eq!(ids, vec![RecordId::new(-1), RecordId::new(2), RecordId::new(10)]);
    }

    #[test]
    fn record_id_parses_and_displays() {
        let id: RecordId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert!("forty-two".parse::<RecordId>().is_err());
    }

    #[test]
    fn builder_sets_flag_and_attributes() {
        let lm = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = Record::new(7, lm)
            .with_active(true)
            .with_attribute("name", "Ada")
            .with_attribute("email", "ada@example.com");
        assert_eq!(record.id, RecordId::new(7));
        assert_eq!(record.is_active, Some(true));
        assert_eq!(record.attributes["name"], "Ada");
        assert_eq!(record.attributes.len(), 2);
    }

    #[test]
    fn record_id_serde_transparent() {
        let json = serde_json::to_string(&RecordId::new(3)).unwrap();
        assert_eq!(json, "3");
    }
}
