//! Per-record async locks.
//!
//! Upload and ledger commit for one id run under that id's lock, so two
//! tasks in this process never interleave writes for the same record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use archivist_types::record::RecordId;
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<RecordId, Arc<tokio::sync::Mutex<()>>>;

/// Lazily populated map of per-id mutexes. Entries are dropped once no
/// task holds or waits on them.
#[derive(Debug, Clone, Default)]
pub struct IdLocks {
    map: Arc<Mutex<LockMap>>,
}

/// Held lock for one id; released on drop.
pub struct IdGuard {
    id: RecordId,
    map: Arc<Mutex<LockMap>>,
    _guard: OwnedMutexGuard<()>,
}

impl IdLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: RecordId) -> IdGuard {
        let mutex = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(id).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        IdGuard {
            id,
            map: self.map.clone(),
            _guard: guard,
        }
    }

    /// Number of ids currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference from the map, one from our guard.
        if map.get(&self.id).is_some_and(|m| Arc::strong_count(m) <= 2) {
            map.remove(&self.id);
        }
    }
}
