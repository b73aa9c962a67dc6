//! Freshness-aware read routing between the live store and the archive.

use std::sync::Arc;

use archivist_types::classification::{Classification, ClassificationPolicy, Predicate};
use archivist_types::error::ArchiveError;
use archivist_types::record::{Record, RecordId};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;

use crate::archive::ArchiveGateway;
use crate::classifier::{CandidateFilter, Classifier, Retention};
use crate::codec::DocumentCodec;
use crate::source::{Candidate, RecordStore};

/// Where a routed record was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Live,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedRecord {
    pub source: RecordSource,
    pub record: Record,
}

/// Serves reads from the live store for active records and from the archive
/// otherwise. The threshold is re-derived from [`Retention`] on every call.
#[derive(Clone)]
pub struct ReadRouter {
    store: Arc<dyn RecordStore>,
    gateway: ArchiveGateway,
    policy: ClassificationPolicy,
    retention: Retention,
    codec: DocumentCodec,
}

impl ReadRouter {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: ArchiveGateway,
        policy: ClassificationPolicy,
        retention: Retention,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            retention,
            codec: DocumentCodec,
        }
    }

    /// Classifier bound to the threshold as of now.
    #[must_use]
    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.policy, self.retention.threshold_at(Utc::now()))
    }

    /// Look up `id`, preferring the live row while it is active.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither the store nor the archive has the id,
    /// or the store error if the live lookup fails.
    pub async fn route(&self, id: RecordId) -> Result<RoutedRecord, ArchiveError> {
        let live = self.store.get(id).await?;

        if let Some(record) = &live {
            if self.classifier().classify(record) == Classification::Active {
                tracing::debug!(id = id.get(), "Serving active record from live store");
                return Ok(RoutedRecord {
                    source: RecordSource::Live,
                    record: record.clone(),
                });
            }
        }

        match self.archived_record(id).await {
            Ok(record) => {
                tracing::debug!(id = id.get(), "Serving record from archive");
                Ok(RoutedRecord {
                    source: RecordSource::Archive,
                    record,
                })
            }
            Err(err) => match live {
                Some(record) => {
                    if err.is_not_found() {
                        tracing::debug!(id = id.get(), "Legacy record not yet archived");
                    } else {
                        tracing::warn!(
                            id = id.get(),
                            category = %err.category,
                            code = err.code.as_str(),
                            "Archive read failed, serving live row"
                        );
                    }
                    Ok(RoutedRecord {
                        source: RecordSource::Live,
                        record,
                    })
                }
                None => Err(err),
            },
        }
    }

    /// Raw archived document bytes for `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is archived for the id.
    pub async fn archived(&self, id: RecordId) -> Result<Bytes, ArchiveError> {
        self.gateway.get(id).await
    }

    async fn archived_record(&self, id: RecordId) -> Result<Record, ArchiveError> {
        let bytes = self.gateway.get(id).await?;
        self.codec.decode(&bytes)
    }

    /// Live rows that classify active now, ascending by id. Undecodable rows
    /// are left out.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn active(&self, limit: usize) -> Result<Vec<Record>, ArchiveError> {
        let classifier = self.classifier();
        let filter = CandidateFilter::new(Predicate::Active, classifier);
        let mut out = Vec::new();
        let mut after = None;

        while out.len() < limit {
            let page = self.store.fetch_page(&filter, after, limit).await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id());
            let full_page = page.len() >= limit;
            out.extend(
                page.into_iter()
                    .filter_map(Candidate::into_record)
                    .filter(|record| classifier.classify(record) == Classification::Active),
            );
            if !full_page {
                break;
            }
        }
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ExistingObjectPolicy, KeyTemplate, MemoryObjectStore, ObjectStore};
    use crate::source::MemoryRecordStore;
    use archivist_types::error::ErrorCategory;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        objects: Arc<MemoryObjectStore>,
        router: ReadRouter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let gateway = ArchiveGateway::new(
            objects.clone(),
            KeyTemplate::default(),
            ExistingObjectPolicy::Overwrite,
        );
        let router = ReadRouter::new(
            store.clone(),
            gateway,
            ClassificationPolicy::FlagAndAge,
            Retention::Days(365),
        );
        Fixture {
            store,
            objects,
            router,
        }
    }

    async fn archive(objects: &MemoryObjectStore, record: &Record) {
        let body = DocumentCodec.encode(record).unwrap();
        objects
            .put(&format!("customer-{}.json", record.id), body)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_record_served_live_even_if_archived() {
        let f = fixture();
        let recent = Record::new(7, Utc::now()).with_attribute("name", "fresh");
        let stale = Record::new(7, Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap())
            .with_attribute("name", "stale");
        f.store.upsert(recent.clone()).unwrap();
        archive(&f.objects, &stale).await;

        let routed = f.router.route(RecordId::new(7)).await.unwrap();
        assert_eq!(routed.source, RecordSource::Live);
        assert_eq!(routed.record, recent);
    }

    #[tokio::test]
    async fn legacy_record_served_from_archive() {
        let f = fixture();
        let old = Record::new(3, Utc::now() - Duration::days(800)).with_active(false);
        f.store.upsert(old.clone()).unwrap();
        archive(&f.objects, &old).await;

        let routed = f.router.route(RecordId::new(3)).await.unwrap();
        assert_eq!(routed.source, RecordSource::Archive);
        assert_eq!(routed.record, old);
    }

    #[tokio::test]
    async fn unarchived_legacy_record_falls_back_to_live() {
        let f = fixture();
        let old = Record::new(4, Utc::now() - Duration::days(800));
        f.store.upsert(old.clone()).unwrap();

        let routed = f.router.route(RecordId::new(4)).await.unwrap();
        assert_eq!(routed.source, RecordSource::Live);
    }

    #[tokio::test]
    async fn archive_only_record_is_served() {
        let f = fixture();
        let old = Record::new(9, Utc::now() - Duration::days(800));
        archive(&f.objects, &old).await;

        let routed = f.router.route(RecordId::new(9)).await.unwrap();
        assert_eq!(routed.source, RecordSource::Archive);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let f = fixture();
        let err = f.router.route(RecordId::new(404)).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
        assert!(f.router.archived(RecordId::new(404)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn active_lists_only_fresh_rows() {
        let f = fixture();
        f.store.upsert(Record::new(1, Utc::now())).unwrap();
        f.store
            .upsert(Record::new(2, Utc::now() - Duration::days(800)))
            .unwrap();
        f.store.upsert(Record::new(3, Utc::now()).with_active(false)).unwrap();
        f.store.upsert(Record::new(4, Utc::now())).unwrap();

        let ids: Vec<i64> = f
            .router
            .active(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.get())
            .collect();
        assert_eq!(ids, vec![1, 4]);

        let limited = f.router.active(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
