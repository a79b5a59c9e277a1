//! Error types for the version graph.

use arbor_ops::OpError;
use arbor_store::StoreError;
use arbor_tree::TreeError;
use arbor_types::ObjectHash;

/// Errors that can occur while reading or writing versions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DagError {
    /// The version hash is unknown to the store.
    #[error("version not found: {0}")]
    VersionNotFound(ObjectHash),

    /// A version record violates a structural rule.
    #[error("invalid version {id}: {reason}")]
    InvalidVersion { id: String, reason: String },

    /// A history query was given parameters it cannot honour.
    #[error("invalid history query: {0}")]
    InvalidQuery(String),

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A tree of a version could not be read.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Replaying or capturing operations failed.
    #[error(transparent)]
    Operation(#[from] OpError),
}

impl DagError {
    /// `true` for [`DagError::VersionNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VersionNotFound(_))
    }
}

/// Convenience alias for version graph results.
pub type DagResult<T> = Result<T, DagError>;
