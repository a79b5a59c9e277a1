//! Error types for the repository server.

use thiserror::Error;

use arbor_dag::DagError;
use arbor_merge::MergeError;
use arbor_ops::OpError;
use arbor_refs::RefError;
use arbor_store::StoreError;
use arbor_tree::TreeError;
use arbor_txn::TxError;
use arbor_types::{BranchReference, TypeError};

#[derive(Debug, Error)]
pub enum ServerError {
    /// The branch kept moving; every merge-and-retry round lost the race.
    #[error("push to {branch} did not settle after {attempts} attempts")]
    Conflict {
        branch: BranchReference,
        attempts: usize,
    },

    #[error("permission denied: {user} may not {action}")]
    PermissionDenied { user: String, action: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Refs(#[from] RefError),

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Operation(#[from] OpError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Id(#[from] TypeError),
}

impl ServerError {
    /// `true` for an unknown version. Callers can recover by pulling without
    /// a known version.
    pub fn is_version_not_found(&self) -> bool {
        match self {
            Self::Dag(e) => e.is_not_found(),
            Self::Merge(MergeError::Dag(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
