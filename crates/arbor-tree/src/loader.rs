use std::sync::Arc;

use arbor_store::{
    fetch_one, BulkQuery, ObjectCache, ObjectStore, RequestType, StoreError, StoredObject,
};
use arbor_types::ObjectHash;

use crate::chunk::TreeChunk;
use crate::error::{TreeError, TreeResult};

/// Default number of chunk hashes fetched per store round trip.
pub const DEFAULT_CHUNK_BATCH: usize = 5000;

/// Loads and saves tree chunks through a decoded-chunk cache.
///
/// Every read goes through a [`BulkQuery`]; single loads use a one-off query.
pub struct ChunkLoader {
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache<TreeChunk>,
    request_type: RequestType,
}

impl ChunkLoader {
    pub fn new(store: Arc<dyn ObjectStore>, cache_capacity: usize) -> Self {
        Self {
            store,
            cache: ObjectCache::new(cache_capacity),
            request_type: RequestType::new("tree-chunks", DEFAULT_CHUNK_BATCH),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.request_type = RequestType::new("tree-chunks", batch_size);
        self
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &ObjectCache<TreeChunk> {
        &self.cache
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Load a chunk that must exist.
    pub fn load(&self, hash: &ObjectHash) -> TreeResult<Arc<TreeChunk>> {
        if let Some(chunk) = self.cache.get(hash) {
            return Ok(chunk);
        }
        let bytes = fetch_one(self.store(), self.request_type, *hash)?;
        self.decode(*hash, bytes.as_deref())
    }

    /// Encode, store, and cache a chunk.
    pub fn save(&self, chunk: TreeChunk) -> TreeResult<ObjectHash> {
        let object = StoredObject::encode(&chunk)?;
        let hash = self.store.write(&object)?;
        self.cache.insert(hash, Arc::new(chunk));
        Ok(hash)
    }

    /// Turn fetched bytes into a cached chunk; absence is a missing entry.
    pub fn decode(&self, hash: ObjectHash, bytes: Option<&[u8]>) -> TreeResult<Arc<TreeChunk>> {
        let bytes = bytes.ok_or(StoreError::MissingEntry(hash))?;
        let chunk: TreeChunk = StoredObject::from_bytes(&hash, bytes)?.decode()?;
        Ok(self.cache.insert(hash, Arc::new(chunk)))
    }

    /// Resolve a chunk inside a bulk query.
    ///
    /// Cached chunks are handed to `then` on the query's next step, others are
    /// batched with every other pending chunk request.
    pub fn request<'s, F>(self: &Arc<Self>, query: &mut BulkQuery<'s>, hash: ObjectHash, then: F)
    where
        F: FnOnce(&mut BulkQuery<'s>, TreeResult<Arc<TreeChunk>>) + 's,
    {
        if let Some(chunk) = self.cache.get(&hash) {
            query.defer(move |q| then(q, Ok(chunk)));
            return;
        }
        let loader = Arc::clone(self);
        query.request(self.request_type, hash, move |q, result| {
            let chunk = result
                .map_err(TreeError::from)
                .and_then(|bytes| loader.decode(hash, bytes));
            then(q, chunk)
        });
    }
}

impl std::fmt::Debug for ChunkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkLoader")
            .field("request_type", &self.request_type)
            .field("cache", &self.cache)
            .finish()
    }
}
