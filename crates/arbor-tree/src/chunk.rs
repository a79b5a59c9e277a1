use serde::{Deserialize, Serialize};

use arbor_store::{ObjectData, ObjectKind, ObjectRef};
use arbor_types::{NodeId, ObjectHash};

use crate::node::NodeData;

/// Bits of the node id consumed per trie level.
pub const BITS_PER_LEVEL: u32 = 5;
/// A chunk holding at most this many nodes is always a leaf.
pub const MAX_LEAF_SIZE: usize = 8;
/// Levels below which every chunk is a leaf (all 64 id bits consumed).
pub const MAX_DEPTH: u32 = 13;

/// One chunk of the persistent hash tree.
///
/// The trie is keyed by node id, [`BITS_PER_LEVEL`] bits per level starting
/// from the least significant bits. Its shape is a pure function of the set
/// of nodes it holds: a subtree with at most [`MAX_LEAF_SIZE`] nodes is a
/// single leaf, anything larger is split. Equal node sets therefore hash
/// identically no matter which edits produced them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeChunk {
    /// Nodes sorted by id.
    Leaf { nodes: Vec<NodeData> },
    /// `children[i]` is the chunk of the i-th set bit of `bitmap`.
    Internal {
        bitmap: u32,
        size: u64,
        children: Vec<ObjectHash>,
    },
}

impl TreeChunk {
    pub fn empty() -> Self {
        Self::Leaf { nodes: Vec::new() }
    }

    /// Number of nodes in this chunk's subtree.
    pub fn size(&self) -> u64 {
        match self {
            Self::Leaf { nodes } => nodes.len() as u64,
            Self::Internal { size, .. } => *size,
        }
    }

    /// Child chunk covering `id` at `level`, if any.
    pub fn child_for(&self, id: NodeId, level: u32) -> Option<ObjectHash> {
        match self {
            Self::Leaf { .. } => None,
            Self::Internal {
                bitmap, children, ..
            } => {
                let s = slot(id, level);
                if bitmap & (1 << s) == 0 {
                    None
                } else {
                    children.get(child_index(*bitmap, s)).copied()
                }
            }
        }
    }

    /// Node `id` if it is held directly in this leaf.
    pub fn find(&self, id: NodeId) -> Option<&NodeData> {
        match self {
            Self::Leaf { nodes } => nodes
                .binary_search_by_key(&id, |n| n.id)
                .ok()
                .map(|i| &nodes[i]),
            Self::Internal { .. } => None,
        }
    }
}

impl ObjectData for TreeChunk {
    const KIND: ObjectKind = ObjectKind::TreeChunk;

    fn references(&self) -> Vec<ObjectRef> {
        match self {
            Self::Leaf { .. } => Vec::new(),
            Self::Internal { children, .. } => children
                .iter()
                .map(|h| ObjectRef::new(ObjectKind::TreeChunk, *h))
                .collect(),
        }
    }
}

/// Slot of `id` at `level`.
pub fn slot(id: NodeId, level: u32) -> u32 {
    let shifted = id
        .as_u64()
        .checked_shr(BITS_PER_LEVEL * level)
        .unwrap_or(0);
    (shifted & 0x1f) as u32
}

/// Position in `children` of the entry for `slot`.
pub fn child_index(bitmap: u32, slot: u32) -> usize {
    let below = if slot == 0 { 0 } else { bitmap & ((1u32 << slot) - 1) };
    below.count_ones() as usize
}
