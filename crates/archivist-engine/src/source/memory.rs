//! In-memory record store for tests, demos and dry runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use archivist_types::error::ArchiveError;
use archivist_types::record::{Record, RecordId};
use async_trait::async_trait;

use super::{Candidate, RecordStore};
use crate::classifier::CandidateFilter;

/// Record store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the lock is poisoned.
    pub fn upsert(&self, record: Record) -> Result<(), ArchiveError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |r| r.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ArchiveError {
    ArchiveError::store_unavailable("LOCK_POISONED", "record store lock poisoned")
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, ArchiveError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let page = match after {
            Some(after) => records.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)),
            None => records.range(..),
        }
        .map(|(_, record)| record)
        .filter(|record| filter.matches(record))
        .take(limit)
        .cloned()
        .map(Candidate::Record)
        .collect();
        Ok(page)
    }

    async fn get(&self, id: RecordId) -> Result<Option<Record>, ArchiveError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use archivist_types::classification::{ClassificationPolicy, Predicate};
    use chrono::{TimeZone, Utc};

    fn legacy_filter() -> CandidateFilter {
        CandidateFilter::new(
            Predicate::LegacyCandidate,
            Classifier::new(
                ClassificationPolicy::FlagAndAge,
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            ),
        )
    }

    #[tokio::test]
    async fn fetch_page_applies_filter_bound_and_limit() {
        let old = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let store = MemoryRecordStore::with_records([
            Record::new(1, old),
            Record::new(2, new),
            Record::new(3, old),
            Record::new(4, new).with_active(false),
            Record::new(5, old),
        ]);

        let page = store.fetch_page(&legacy_filter(), None, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|c| c.id().get()).collect();
        assert_eq!(ids, vec![1, 3]);

        let page = store
            .fetch_page(&legacy_filter(), Some(RecordId::new(3)), 10)
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|c| c.id().get()).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn get_and_upsert() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty());
        assert!(store.get(RecordId::new(1)).await.unwrap().is_none());

        store.upsert(Record::new(1, Utc::now())).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(RecordId::new(1)).await.unwrap().is_some());
    }
}
