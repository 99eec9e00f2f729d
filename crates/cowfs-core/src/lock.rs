//! Per-filename mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Lock table keyed by filename. Entries exist only while some caller holds
/// or waits on them.
#[derive(Debug, Default)]
pub(crate) struct FileLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileLocks {
    /// Run `f` while holding the lock for `filename`.
    pub(crate) fn with<T>(&self, filename: &str, f: impl FnOnce() -> T) -> T {
        let out = {
            let lock = self.for_file(filename);
            let _guard = lock.lock();
            f()
        };
        self.release(filename);
        out
    }

    /// Lock handle for `filename`, created on first use.
    fn for_file(&self, filename: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(filename) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the entry for `filename` unless another caller still holds a handle.
    fn release(&self, filename: &str) {
        // Handles are cloned under the shard lock, so the count cannot rise
        // while remove_if inspects it
        self.locks
            .remove_if(filename, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
