use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use arbor_types::ObjectHash;

/// Cache of decoded records keyed by hash.
///
/// Records never change under a hash, so an entry is valid for as long as it
/// is held; eviction is purely about capacity. Pinned entries sit outside the
/// LRU and are never evicted until unpinned as often as they were pinned.
pub struct ObjectCache<V> {
    entries: Mutex<LruCache<ObjectHash, Arc<V>>>,
    pinned: Mutex<HashMap<ObjectHash, (Arc<V>, usize)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> ObjectCache<V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            pinned: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: &ObjectHash) -> Option<Arc<V>> {
        let found = match self.pinned.lock().get(hash) {
            Some((value, _)) => Some(Arc::clone(value)),
            None => self.entries.lock().get(hash).cloned(),
        };
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, hash: ObjectHash, value: Arc<V>) -> Arc<V> {
        self.entries.lock().put(hash, Arc::clone(&value));
        value
    }

    /// Keep `value` resident until [`unpin`](Self::unpin) has been called
    /// once for every `pin`.
    pub fn pin(&self, hash: ObjectHash, value: Arc<V>) {
        self.pinned.lock().entry(hash).or_insert((value, 0)).1 += 1;
    }

    /// Release one pin. The last release moves the entry back into the LRU;
    /// unpinning an entry that is not pinned does nothing.
    pub fn unpin(&self, hash: &ObjectHash) {
        let mut pinned = self.pinned.lock();
        let Some((_, count)) = pinned.get_mut(hash) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            if let Some((value, _)) = pinned.remove(hash) {
                drop(pinned);
                self.entries.lock().put(*hash, value);
            }
        }
    }

    /// Number of entries currently pinned.
    pub fn pinned_len(&self) -> usize {
        self.pinned.lock().len()
    }

    /// Resident entries, pinned ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len() + self.pinned.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl<V> std::fmt::Debug for ObjectCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hits, misses) = self.hit_stats();
        f.debug_struct("ObjectCache")
            .field("entries", &self.entries.lock().len())
            .field("pinned", &self.pinned.lock().len())
            .field("hits", &hits)
            .field("misses", &misses)
            .finish()
    }
}
