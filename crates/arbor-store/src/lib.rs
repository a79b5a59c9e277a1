//! Content-addressed object storage for arbor.
//!
//! Every immutable record (tree chunks, versions, operation lists) is stored
//! under the SHA-256 of its bytes. The physical store is a collaborator behind
//! the [`KeyValueStore`] boundary; this crate adds the content-addressed view
//! on top of it and the machinery for reading it efficiently.
//!
//! # Components
//!
//! - [`ObjectStore`] -- `get` / `get_all` / `put` over hashes
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`KeyValueStore`], [`InMemoryKeyValueStore`], [`KvObjectStore`] -- the
//!   namespaced key/value boundary
//! - [`ObjectCache`] -- LRU cache of decoded records with pinning
//! - [`BulkQuery`] -- batches single-hash reads, newest request first
//!
//! # Design Rules
//!
//! 1. Records are immutable once written (content addressing guarantees this).
//! 2. Writes are idempotent.
//! 3. Batched reads may return partial results; absence is not an error at
//!    this layer.
//! 4. All backend errors are propagated, never silently ignored.

pub mod bulk;
pub mod cache;
pub mod error;
pub mod kv;
pub mod memory;
pub mod object;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use bulk::{fetch_one, BulkQuery, BulkStats, Callback, RequestType};
pub use cache::ObjectCache;
pub use error::{StoreError, StoreResult};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KvObjectStore, Namespace, StoreKey};
pub use memory::{InMemoryObjectStore, StoreStats};
pub use object::{ObjectData, ObjectKind, ObjectRef, StoredObject};
pub use traits::ObjectStore;
