use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use arbor_types::ObjectHash;

use crate::error::StoreResult;
use crate::traits::ObjectStore;

/// Round-trip counters of an [`InMemoryObjectStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Calls to `get`.
    pub get_calls: u64,
    /// Calls to `get_all`.
    pub get_all_calls: u64,
    /// Hashes requested across all `get_all` calls.
    pub hashes_requested: u64,
    /// Records written (including idempotent rewrites).
    pub puts: u64,
}

impl StoreStats {
    /// Read round trips of either kind.
    pub fn read_calls(&self) -> u64 {
        self.get_calls + self.get_all_calls
    }
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Counts its read round trips so that
/// batching behaviour can be asserted.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectHash, Vec<u8>>>,
    get_calls: AtomicU64,
    get_all_calls: AtomicU64,
    hashes_requested: AtomicU64,
    puts: AtomicU64,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            get_calls: AtomicU64::new(0),
            get_all_calls: AtomicU64::new(0),
            hashes_requested: AtomicU64::new(0),
            puts: AtomicU64::new(0),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Total bytes across all stored records.
    pub fn total_bytes(&self) -> u64 {
        self.objects.read().values().map(|b| b.len() as u64).sum()
    }

    /// Sorted list of all stored hashes.
    pub fn all_hashes(&self) -> Vec<ObjectHash> {
        let mut hashes: Vec<ObjectHash> = self.objects.read().keys().copied().collect();
        hashes.sort();
        hashes
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            get_calls: self.get_calls.load(Ordering::Relaxed),
            get_all_calls: self.get_all_calls.load(Ordering::Relaxed),
            hashes_requested: self.hashes_requested.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.get_calls.store(0, Ordering::Relaxed);
        self.get_all_calls.store(0, Ordering::Relaxed);
        self.hashes_requested.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, hash: &ObjectHash) -> StoreResult<Option<Vec<u8>>> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.read().get(hash).cloned())
    }

    fn get_all(&self, hashes: &[ObjectHash]) -> StoreResult<HashMap<ObjectHash, Vec<u8>>> {
        self.get_all_calls.fetch_add(1, Ordering::Relaxed);
        self.hashes_requested
            .fetch_add(hashes.len() as u64, Ordering::Relaxed);
        let map = self.objects.read();
        Ok(hashes
            .iter()
            .filter_map(|h| map.get(h).map(|bytes| (*h, bytes.clone())))
            .collect())
    }

    fn put(&self, hash: ObjectHash, bytes: Vec<u8>) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.objects.write().entry(hash).or_insert(bytes);
        Ok(())
    }

    fn put_all(&self, entries: Vec<(ObjectHash, Vec<u8>)>) -> StoreResult<()> {
        self.puts.fetch_add(entries.len() as u64, Ordering::Relaxed);
        let mut map = self.objects.write();
        for (hash, bytes) in entries {
            map.entry(hash).or_insert(bytes);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
