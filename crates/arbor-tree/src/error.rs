use arbor_store::StoreError;
use arbor_types::{NodeId, ObjectHash};

/// Errors from tree reads and edits.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node already exists: {0}")]
    NodeExists(NodeId),

    #[error("index {index} out of range for role {role:?} of {parent} (len {len})")]
    IndexOutOfRange {
        parent: NodeId,
        role: String,
        index: usize,
        len: usize,
    },

    #[error("{child} is not a child of {parent} in role {role:?}")]
    ChildNotInRole {
        parent: NodeId,
        role: String,
        child: NodeId,
    },

    #[error("moving {node} below {target} would create a cycle")]
    CycleDetected { node: NodeId, target: NodeId },

    #[error("the root node cannot be moved or removed")]
    RootImmutable,

    #[error("{parent} lists child {child} which is not in the tree")]
    DanglingChild { parent: NodeId, child: NodeId },
}

impl TreeError {
    /// The hash whose absence caused this error, if any.
    pub fn missing_entry(&self) -> Option<ObjectHash> {
        match self {
            Self::Store(StoreError::MissingEntry(hash)) => Some(*hash),
            _ => None,
        }
    }
}

pub type TreeResult<T> = Result<T, TreeError>;
