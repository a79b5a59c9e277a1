//! Version records.
//!
//! A [`VersionData`] is the immutable commit object stored in the object
//! store. A [`Version`] pairs it with its own hash so callers never have to
//! recompute it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use arbor_ops::Operation;
use arbor_store::{ObjectData, ObjectKind, ObjectRef};
use arbor_types::{ObjectHash, Timestamp, VersionId};

/// Where the operations of a version live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum VersionOperations {
    /// Embedded in the version record.
    Inline { operations: Vec<Operation> },
    /// In a separate [`OperationList`] record.
    Stored { hash: ObjectHash, count: usize },
}

impl VersionOperations {
    pub fn count(&self) -> usize {
        match self {
            Self::Inline { operations } => operations.len(),
            Self::Stored { count, .. } => *count,
        }
    }
}

/// The stored commit object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionData {
    pub id: VersionId,
    /// Root chunk of the version's tree.
    pub tree: ObjectHash,
    /// The version whose tree `operations` were recorded against.
    pub base: Option<ObjectHash>,
    /// For merge versions, the version that was merged into `base`.
    pub merged: Option<ObjectHash>,
    pub operations: VersionOperations,
    pub author: Option<String>,
    pub time: Timestamp,
}

impl ObjectData for VersionData {
    const KIND: ObjectKind = ObjectKind::Version;

    fn references(&self) -> Vec<ObjectRef> {
        let mut refs = vec![ObjectRef::new(ObjectKind::TreeChunk, self.tree)];
        refs.extend(
            self.base
                .iter()
                .chain(self.merged.iter())
                .map(|h| ObjectRef::new(ObjectKind::Version, *h)),
        );
        match &self.operations {
            VersionOperations::Inline { operations } => refs.extend(operation_refs(operations)),
            VersionOperations::Stored { hash, .. } => {
                refs.push(ObjectRef::new(ObjectKind::OperationList, *hash))
            }
        }
        refs
    }
}

/// Operations of a version stored out of line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationList {
    pub operations: Vec<Operation>,
}

impl ObjectData for OperationList {
    const KIND: ObjectKind = ObjectKind::OperationList;

    fn references(&self) -> Vec<ObjectRef> {
        operation_refs(&self.operations).collect()
    }
}

/// Versions named by `RevertTo` operations.
fn operation_refs(operations: &[Operation]) -> impl Iterator<Item = ObjectRef> + '_ {
    operations.iter().flat_map(|op| match op {
        Operation::RevertTo {
            latest_known,
            target,
        } => vec![
            ObjectRef::new(ObjectKind::Version, *latest_known),
            ObjectRef::new(ObjectKind::Version, *target),
        ],
        _ => Vec::new(),
    })
}

/// A loaded version: its hash plus the decoded record.
#[derive(Clone)]
pub struct Version {
    hash: ObjectHash,
    data: Arc<VersionData>,
}

impl Version {
    pub fn new(hash: ObjectHash, data: Arc<VersionData>) -> Self {
        Self { hash, data }
    }

    pub fn hash(&self) -> ObjectHash {
        self.hash
    }

    pub fn id(&self) -> VersionId {
        self.data.id
    }

    pub fn tree_hash(&self) -> ObjectHash {
        self.data.tree
    }

    pub fn base_hash(&self) -> Option<ObjectHash> {
        self.data.base
    }

    pub fn merged_hash(&self) -> Option<ObjectHash> {
        self.data.merged
    }

    /// Base and merged parents, in that order.
    pub fn parent_hashes(&self) -> impl Iterator<Item = ObjectHash> + '_ {
        self.data.base.iter().chain(self.data.merged.iter()).copied()
    }

    pub fn is_merge(&self) -> bool {
        self.data.merged.is_some()
    }

    pub fn author(&self) -> Option<&str> {
        self.data.author.as_deref()
    }

    pub fn time(&self) -> Timestamp {
        self.data.time
    }

    pub fn operation_count(&self) -> usize {
        self.data.operations.count()
    }

    pub fn data(&self) -> &VersionData {
        &self.data
    }

    pub(crate) fn shared_data(&self) -> &Arc<VersionData> {
        &self.data
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Version {}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("id", &self.data.id)
            .field("hash", &self.hash.short_hex())
            .field("time", &self.data.time)
            .field("merge", &self.is_merge())
            .finish()
    }
}
