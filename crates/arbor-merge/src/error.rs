//! Error types for the merge engine.

use arbor_dag::DagError;
use arbor_ops::OpError;
use arbor_types::{ObjectHash, TypeError};

/// Errors that can occur while merging two versions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MergeError {
    /// The two versions share no base version.
    #[error("incompatible history: {current} and {incoming} have no common base")]
    IncompatibleHistory {
        current: ObjectHash,
        incoming: ObjectHash,
    },

    /// A version with operations has no base to capture them against.
    #[error("version {0} has operations but no base version")]
    MissingBase(ObjectHash),

    /// No id could be allocated for the merge version.
    #[error("cannot allocate merge version id: {0}")]
    Id(#[from] TypeError),

    #[error(transparent)]
    Dag(#[from] DagError),

    /// Capturing or replaying an operation failed.
    #[error(transparent)]
    Operation(#[from] OpError),
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;
