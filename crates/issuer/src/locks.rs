//! Per-record critical sections
//!
//! Every call that mutates a domain record holds the lock for that
//! record's (user id, domain) key for its whole duration. Calls for
//! different keys never wait on each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use dnsproof_common::RecordKey;

type Registry = DashMap<RecordKey, Arc<Mutex<()>>>;

/// Registry of async mutexes keyed by record.
///
/// Cloning shares the registry. A key's mutex lives only while someone
/// holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct DomainLocks {
    inner: Arc<Registry>,
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &RecordKey) -> RecordGuard {
        let mutex = self.inner.entry(key.clone()).or_default().clone();
        trace!(record = %key, "Waiting for record lock");
        let guard = mutex.lock_owned().await;

        RecordGuard {
            guard: Some(guard),
            key: key.clone(),
            registry: Arc::clone(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one record, released on drop.
#[derive(Debug)]
pub struct RecordGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: RecordKey,
    registry: Arc<Registry>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        // unlock before checking who else still references the mutex
        drop(self.guard.take());
        // the shard lock keeps a concurrent `lock` from cloning in between
        self.registry
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
