//! Error types for the operations crate.

use arbor_tree::TreeError;
use arbor_types::{NodeId, ObjectHash};

/// Errors that can occur while applying, rebasing or deriving operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OpError {
    /// The tree rejected the edit or a chunk could not be read.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A `RevertTo` named a version that cannot be resolved.
    #[error("version not found: {0}")]
    VersionNotFound(ObjectHash),

    /// Resolving a version failed for another reason.
    #[error("failed to resolve version {hash}: {reason}")]
    Resolve { hash: ObjectHash, reason: String },

    /// The difference between two trees cannot be expressed as operations.
    #[error("cannot express change of {node} as an operation: {reason}")]
    Unrepresentable { node: NodeId, reason: String },

    /// Replaying a computed diff did not reproduce the target tree.
    #[error("diff replay produced {actual} instead of {expected}")]
    DiffMismatch {
        expected: ObjectHash,
        actual: ObjectHash,
    },
}

/// Convenience alias for operation results.
pub type OpResult<T> = Result<T, OpError>;
