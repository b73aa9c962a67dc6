//! Lazy keyset cursor over a record store.

use std::collections::VecDeque;
use std::sync::Arc;

use archivist_types::error::ArchiveError;
use archivist_types::record::RecordId;

use super::{Candidate, RecordStore};
use crate::classifier::CandidateFilter;

/// Restartable, finite sequence of candidates ordered by id ascending.
///
/// Pages are fetched with `WHERE id > after ORDER BY id LIMIT page_size`.
/// A failed fetch leaves the cursor untouched, so calling
/// [`RecordCursor::next`] again retries the same page.
pub struct RecordCursor {
    store: Arc<dyn RecordStore>,
    filter: CandidateFilter,
    page_size: usize,
    /// Highest id fetched so far.
    fetched_after: Option<RecordId>,
    /// Highest id handed out by `next`.
    position: Option<RecordId>,
    buffer: VecDeque<Candidate>,
    exhausted: bool,
    pages_fetched: u64,
}

impl RecordCursor {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, filter: CandidateFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            fetched_after: None,
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// Restart the sequence just after `id`.
    #[must_use]
    pub fn resume_after(mut self, id: RecordId) -> Self {
        self.fetched_after = Some(id);
        self.position = Some(id);
        self.buffer.clear();
        self.exhausted = false;
        self
    }

    /// Id of the last candidate returned, or the resume point.
    #[must_use]
    pub fn position(&self) -> Option<RecordId> {
        self.position
    }

    #[must_use]
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Next candidate, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates the store error of a failed page fetch.
    pub async fn next(&mut self) -> Result<Option<Candidate>, ArchiveError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        let next = self.buffer.pop_front();
        if let Some(candidate) = &next {
            self.position = Some(candidate.id());
        }
        Ok(next)
    }

    async fn fill(&mut self) -> Result<(), ArchiveError> {
        let page = self
            .store
            .fetch_page(&self.filter, self.fetched_after, self.page_size)
            .await?;
        self.pages_fetched += 1;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        for candidate in page {
            let id = candidate.id();
            // Guard against a store that ignores the keyset bound.
            if self.fetched_after.is_some_and(|last| id <= last) {
                continue;
            }
            self.fetched_after = Some(id);
            self.buffer.push_back(candidate);
        }
        if self.buffer.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }
}
