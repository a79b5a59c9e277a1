//! Error types for reference operations.

use thiserror::Error;

use arbor_txn::TxError;
use arbor_types::{BranchReference, RepositoryId, TypeError};

/// Errors that can occur during reference operations.
#[derive(Debug, Clone, Error)]
pub enum RefError {
    /// The branch name is invalid.
    #[error("invalid branch name: {name}: {reason}")]
    InvalidBranchName { name: String, reason: String },

    /// The repository is not in either repository list.
    #[error("repository not found: {0}")]
    RepositoryNotFound(RepositoryId),

    /// A repository with this id already exists.
    #[error("repository already exists: {0}")]
    RepositoryExists(RepositoryId),

    /// The branch has no head.
    #[error("branch not found: {0}")]
    BranchNotFound(BranchReference),

    /// A stored list or head could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Id(#[from] TypeError),

    #[error(transparent)]
    Transaction(#[from] TxError),
}

impl From<bincode::Error> for RefError {
    fn from(e: bincode::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

/// Convenience type alias for ref operations.
pub type RefResult<T> = std::result::Result<T, RefError>;
