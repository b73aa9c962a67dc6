//! Resume watermark tracking and persistence.
//!
//! Candidates are dispatched in ascending id order but settle out of order.
//! The watermark is the highest dispatched id below which every candidate
//! settled cleanly (succeeded or skipped). Failed and interrupted ids pin
//! the watermark so a resumed run revisits them.

use std::collections::BTreeMap;

use anyhow::Result;
use archivist_state::LedgerBackend;
use archivist_types::ledger::MigrationId;
use archivist_types::record::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    InFlight,
    Settled,
    Pinned,
}

/// Contiguous-prefix tracker over dispatched ids.
#[derive(Debug, Default)]
pub(crate) struct ResumeTracker {
    watermark: Option<RecordId>,
    open: BTreeMap<RecordId, Slot>,
    pinned: bool,
}

impl ResumeTracker {
    pub(crate) fn new(start_after: Option<RecordId>) -> Self {
        Self {
            watermark: start_after,
            open: BTreeMap::new(),
            pinned: false,
        }
    }

    /// Register a candidate handed out by the cursor.
    pub(crate) fn observe(&mut self, id: RecordId) {
        if self.pinned {
            return;
        }
        self.open.insert(id, Slot::InFlight);
    }

    /// The candidate is done and needs no revisit.
    pub(crate) fn settle(&mut self, id: RecordId) {
        self.mark(id, Slot::Settled);
    }

    /// The candidate failed or was interrupted; the watermark stops below it.
    pub(crate) fn pin(&mut self, id: RecordId) {
        self.mark(id, Slot::Pinned);
    }

    fn mark(&mut self, id: RecordId, slot: Slot) {
        if self.pinned {
            return;
        }
        if let Some(entry) = self.open.get_mut(&id) {
            *entry = slot;
        }
        self.advance();
    }

    fn advance(&mut self) {
        if self.pinned {
            return;
        }
        while let Some((&id, &slot)) = self.open.first_key_value() {
            match slot {
                Slot::Settled => {
                    self.watermark = Some(id);
                    self.open.remove(&id);
                }
                Slot::Pinned => {
                    // The watermark is final; nothing left to track.
                    self.pinned = true;
                    self.open.clear();
                    return;
                }
                Slot::InFlight => return,
            }
        }
    }

    pub(crate) fn watermark(&self) -> Option<RecordId> {
        self.watermark
    }
}

/// Load the persisted resume point for `migration`.
pub(crate) fn load_resume_point(
    ledger: &dyn LedgerBackend,
    migration: &MigrationId,
) -> Result<Option<RecordId>> {
    let cursor = ledger.get_resume_cursor(migration)?;
    if let Some(cursor) = &cursor {
        tracing::info!(
            migration = migration.as_str(),
            after = cursor.after.get(),
            saved_at = %cursor.updated_at,
            "Resuming after persisted watermark"
        );
    }
    Ok(cursor.map(|c| c.after))
}

/// Persist (or clear, with `None`) the resume point for `migration`.
pub(crate) fn persist_resume_point(
    ledger: &dyn LedgerBackend,
    migration: &MigrationId,
    after: Option<RecordId>,
) -> Result<()> {
    ledger.set_resume_cursor(migration, after)?;
    match after {
        Some(after) => tracing::info!(
            migration = migration.as_str(),
            after = after.get(),
            "Resume watermark saved"
        ),
        None => tracing::debug!(migration = migration.as_str(), "Resume watermark cleared"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_state::SqliteLedgerBackend;

    fn id(n: i64) -> RecordId {
        RecordId::new(n)
    }

    fn mid() -> MigrationId {
        MigrationId::new("test_migration")
    }

    #[test]
    fn watermark_follows_contiguous_settled_prefix() {
        let mut tracker = ResumeTracker::new(None);
        for n in [1, 2, 3, 4] {
            tracker.observe(id(n));
        }
        tracker.settle(id(2));
        assert_eq!(tracker.watermark(), None);
        tracker.settle(id(1));
        assert_eq!(tracker.watermark(), Some(id(2)));
        tracker.settle(id(4));
        assert_eq!(tracker.watermark(), Some(id(2)));
        tracker.settle(id(3));
        assert_eq!(tracker.watermark(), Some(id(4)));
    }

    #[test]
    fn pinned_id_stops_watermark_for_good() {
        let mut tracker = ResumeTracker::new(Some(id(10)));
        for n in [11, 12, 13] {
            tracker.observe(id(n));
        }
        tracker.settle(id(11));
        tracker.pin(id(12));
        tracker.settle(id(13));
        assert_eq!(tracker.watermark(), Some(id(11)));
    }

    #[test]
    fn tracking_stops_once_pinned() {
        let mut tracker = ResumeTracker::new(None);
        tracker.observe(id(1));
        tracker.pin(id(1));
        for n in 2..10_000 {
            tracker.observe(id(n));
            tracker.settle(id(n));
        }
        assert!(tracker.open.is_empty());
        assert_eq!(tracker.watermark(), None);
    }

    #[test]
    fn slots_behind_a_pending_pin_stay_bounded_by_in_flight() {
        let mut tracker = ResumeTracker::new(None);
        tracker.observe(id(1));
        tracker.observe(id(2));
        tracker.pin(id(2));
        tracker.observe(id(3));
        assert_eq!(tracker.open.len(), 3);
        tracker.settle(id(1));
        assert_eq!(tracker.watermark(), Some(id(1)));
        assert!(tracker.open.is_empty());
        tracker.observe(id(4));
        assert!(tracker.open.is_empty());
    }

    #[test]
    fn starts_from_resume_point() {
        let tracker = ResumeTracker::new(Some(id(99)));
        assert_eq!(tracker.watermark(), Some(id(99)));
    }

    #[test]
    fn persist_and_load_roundtrip() {
        let backend = SqliteLedgerBackend::in_memory().unwrap();
        assert_eq!(load_resume_point(&backend, &mid()).unwrap(), None);

        persist_resume_point(&backend, &mid(), Some(id(42))).unwrap();
        assert_eq!(load_resume_point(&backend, &mid()).unwrap(), Some(id(42)));

        persist_resume_point(&backend, &mid(), None).unwrap();
        assert_eq!(load_resume_point(&backend, &mid()).unwrap(), None);
    }
}
