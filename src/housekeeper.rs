//! Registration hook for reclaiming server-side objects.
//!
//! Objects such as open cursors are registered with a cleanup action while
//! they are open and unregistered when closed explicitly. What happens to
//! registrations that are never removed is up to the [`Housekeeper`]
//! implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupKey(u64);

/// Action that releases a server-side object. Must not block.
pub type Cleanup = Box<dyn FnOnce() + Send>;

pub trait Housekeeper: Send + Sync {
    fn add(&self, cleanup: Cleanup) -> CleanupKey;

    /// Drop a registration without running it. Returns false if unknown.
    fn remove(&self, key: CleanupKey) -> bool;
}

/// Keeps registrations until told to run them.
#[derive(Default)]
pub struct DeferredHousekeeper {
    next: AtomicU64,
    pending: Mutex<HashMap<CleanupKey, Cleanup>>,
}

impl DeferredHousekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and forget every remaining registration.
    pub fn run_all(&self) -> usize {
        let pending: Vec<Cleanup> = self.pending.lock().drain().map(|(_, c)| c).collect();
        let count = pending.len();
        for cleanup in pending {
            cleanup();
        }
        count
    }
}

impl Housekeeper for DeferredHousekeeper {
    fn add(&self, cleanup: Cleanup) -> CleanupKey {
        let key = CleanupKey(self.next.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().insert(key, cleanup);
        key
    }

    fn remove(&self, key: CleanupKey) -> bool {
        self.pending.lock().remove(&key).is_some()
    }
}

impl std::fmt::Debug for DeferredHousekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredHousekeeper")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn removed_cleanups_never_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let housekeeper = DeferredHousekeeper::new();
        let counter = Arc::clone(&runs);
        let kept = housekeeper.add(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&runs);
        let removed = housekeeper.add(Box::new(move || {
            counter.fetch_add(10, Ordering::SeqCst);
        }));
        assert_ne!(kept, removed);
        assert!(housekeeper.remove(removed));
        assert!(!housekeeper.remove(removed));

        assert_eq!(housekeeper.run_all(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(housekeeper.is_empty());
    }
}
