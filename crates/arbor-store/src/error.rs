use arbor_types::ObjectHash;

/// Errors from object store operations.
///
/// Errors are `Clone` so that one failed batch read can be reported to every
/// callback waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectHash),

    /// A hash referenced by a live object is absent from the store.
    #[error("missing entry: {0} is referenced but not stored")]
    MissingEntry(ObjectHash),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {hash}: computed {computed}")]
    HashMismatch {
        hash: ObjectHash,
        computed: ObjectHash,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The object data is malformed or of an unexpected kind.
    #[error("corrupt object {hash}: {reason}")]
    CorruptObject { hash: ObjectHash, reason: String },

    /// Failure reported by the backing key/value store.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
