use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-ticket-id async locks.
///
/// Entries are created on demand and dropped once the last guard or waiter
/// for an id goes away, so the table only holds ids currently in use.
#[derive(Clone, Debug, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &str) -> KeyedLockGuard {
        // Clone the Arc out so the shard lock is released before awaiting.
        let mutex = self.locks.entry(id.to_owned()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            id: id.to_owned(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct KeyedLockGuard {
    id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // Release first so our own clone of the Arc is gone.
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, m| Arc::strong_count(m) == 1);
    }
}
