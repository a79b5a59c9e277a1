use std::collections::HashMap;

use arbor_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Records are immutable once written. A hash always maps to the same bytes.
/// - `put` is idempotent: writing the same bytes again is a no-op.
/// - `get_all` may return a partial map; absent hashes are simply missing.
/// - Concurrent reads are always safe.
/// - The store never interprets record contents.
pub trait ObjectStore: Send + Sync {
    /// Read the bytes stored under `hash`.
    ///
    /// Returns `Ok(None)` if the hash is unknown.
    fn get(&self, hash: &ObjectHash) -> StoreResult<Option<Vec<u8>>>;

    /// Read many hashes in one round trip.
    ///
    /// Default implementation calls `get()` for each hash. Backends should
    /// override it; the bulk query executor relies on it being one call.
    fn get_all(&self, hashes: &[ObjectHash]) -> StoreResult<HashMap<ObjectHash, Vec<u8>>> {
        let mut found = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(bytes) = self.get(hash)? {
                found.insert(*hash, bytes);
            }
        }
        Ok(found)
    }

    /// Store `bytes` under `hash`.
    fn put(&self, hash: ObjectHash, bytes: Vec<u8>) -> StoreResult<()>;

    /// Store many records. Default implementation calls `put()` for each.
    fn put_all(&self, entries: Vec<(ObjectHash, Vec<u8>)>) -> StoreResult<()> {
        for (hash, bytes) in entries {
            self.put(hash, bytes)?;
        }
        Ok(())
    }

    /// Read bytes that must exist.
    fn require(&self, hash: &ObjectHash) -> StoreResult<Vec<u8>> {
        self.get(hash)?.ok_or(StoreError::NotFound(*hash))
    }

    /// Encode and write a typed object, returning its hash.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectHash> {
        let hash = object.compute_hash();
        self.put(hash, object.to_bytes())?;
        Ok(hash)
    }

    /// Read and verify a typed object.
    fn read(&self, hash: &ObjectHash) -> StoreResult<Option<StoredObject>> {
        match self.get(hash)? {
            Some(bytes) => StoredObject::from_bytes(hash, &bytes).map(Some),
            None => Ok(None),
        }
    }
}
