//! Path-copying operations on the chunk trie.
//!
//! Every function takes the hash of a chunk at some `level` and returns the
//! hash of its replacement. Chunks off the edited path are never touched, so
//! the old and the new tree share them by hash.

use std::collections::BTreeMap;

use arbor_types::{NodeId, ObjectHash};

use crate::chunk::{child_index, slot, TreeChunk, MAX_DEPTH, MAX_LEAF_SIZE};
use crate::error::TreeResult;
use crate::loader::ChunkLoader;
use crate::node::NodeData;

/// Outcome of removing a node from a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removed {
    NotFound,
    Empty,
    Replaced(ObjectHash),
}

pub(crate) fn get(loader: &ChunkLoader, root: ObjectHash, id: NodeId) -> TreeResult<Option<NodeData>> {
    let mut hash = root;
    let mut level = 0;
    loop {
        let chunk = loader.load(&hash)?;
        match chunk.as_ref() {
            TreeChunk::Leaf { .. } => return Ok(chunk.find(id).cloned()),
            TreeChunk::Internal { .. } => match chunk.child_for(id, level) {
                Some(child) => {
                    hash = child;
                    level += 1;
                }
                None => return Ok(None),
            },
        }
    }
}

/// Hashes of the chunks from the root down to the chunk that holds (or
/// would hold) `id`.
pub(crate) fn path(loader: &ChunkLoader, root: ObjectHash, id: NodeId) -> TreeResult<Vec<ObjectHash>> {
    let mut hashes = vec![root];
    let mut level = 0;
    let mut hash = root;
    while let Some(child) = loader.load(&hash)?.child_for(id, level) {
        hashes.push(child);
        hash = child;
        level += 1;
    }
    Ok(hashes)
}

/// Build the canonical subtree for `nodes` (sorted by id, distinct).
pub(crate) fn build(loader: &ChunkLoader, level: u32, nodes: Vec<NodeData>) -> TreeResult<ObjectHash> {
    if nodes.len() <= MAX_LEAF_SIZE || level >= MAX_DEPTH {
        return loader.save(TreeChunk::Leaf { nodes });
    }
    let size = nodes.len() as u64;
    let mut groups: BTreeMap<u32, Vec<NodeData>> = BTreeMap::new();
    for node in nodes {
        groups.entry(slot(node.id, level)).or_default().push(node);
    }
    let mut bitmap = 0u32;
    let mut children = Vec::with_capacity(groups.len());
    for (s, group) in groups {
        bitmap |= 1 << s;
        children.push(build(loader, level + 1, group)?);
    }
    loader.save(TreeChunk::Internal {
        bitmap,
        size,
        children,
    })
}

/// Insert or replace `node`. Returns the new hash and whether the node is new.
pub(crate) fn put(
    loader: &ChunkLoader,
    hash: ObjectHash,
    level: u32,
    node: NodeData,
) -> TreeResult<(ObjectHash, bool)> {
    let chunk = loader.load(&hash)?;
    match chunk.as_ref() {
        TreeChunk::Leaf { nodes } => match nodes.binary_search_by_key(&node.id, |n| n.id) {
            Ok(i) if nodes[i] == node => Ok((hash, false)),
            Ok(i) => {
                let mut nodes = nodes.clone();
                nodes[i] = node;
                Ok((loader.save(TreeChunk::Leaf { nodes })?, false))
            }
            Err(i) => {
                let mut nodes = nodes.clone();
                nodes.insert(i, node);
                Ok((build(loader, level, nodes)?, true))
            }
        },
        TreeChunk::Internal {
            bitmap,
            size,
            children,
        } => {
            let s = slot(node.id, level);
            let idx = child_index(*bitmap, s);
            let mut children = children.clone();
            let (bitmap, inserted) = if bitmap & (1 << s) != 0 {
                let (child, inserted) = put(loader, children[idx], level + 1, node)?;
                if child == children[idx] {
                    return Ok((hash, false));
                }
                children[idx] = child;
                (*bitmap, inserted)
            } else {
                children.insert(idx, build(loader, level + 1, vec![node])?);
                (bitmap | (1 << s), true)
            };
            let size = size + u64::from(inserted);
            let hash = loader.save(TreeChunk::Internal {
                bitmap,
                size,
                children,
            })?;
            Ok((hash, inserted))
        }
    }
}

pub(crate) fn remove(loader: &ChunkLoader, hash: ObjectHash, level: u32, id: NodeId) -> TreeResult<Removed> {
    let chunk = loader.load(&hash)?;
    match chunk.as_ref() {
        TreeChunk::Leaf { nodes } => match nodes.binary_search_by_key(&id, |n| n.id) {
            Err(_) => Ok(Removed::NotFound),
            Ok(_) if nodes.len() == 1 => Ok(Removed::Empty),
            Ok(i) => {
                let mut nodes = nodes.clone();
                nodes.remove(i);
                Ok(Removed::Replaced(loader.save(TreeChunk::Leaf { nodes })?))
            }
        },
        TreeChunk::Internal {
            bitmap,
            size,
            children,
        } => {
            let s = slot(id, level);
            if bitmap & (1 << s) == 0 {
                return Ok(Removed::NotFound);
            }
            let idx = child_index(*bitmap, s);
            let mut children = children.clone();
            let mut bitmap = *bitmap;
            match remove(loader, children[idx], level + 1, id)? {
                Removed::NotFound => return Ok(Removed::NotFound),
                Removed::Empty => {
                    children.remove(idx);
                    bitmap &= !(1 << s);
                }
                Removed::Replaced(child) => children[idx] = child,
            }
            let size = size - 1;
            if size == 0 {
                return Ok(Removed::Empty);
            }
            if size as usize <= MAX_LEAF_SIZE {
                let mut nodes = Vec::with_capacity(size as usize);
                for child in &children {
                    collect(loader, *child, &mut nodes)?;
                }
                nodes.sort_by_key(|n| n.id);
                return Ok(Removed::Replaced(loader.save(TreeChunk::Leaf { nodes })?));
            }
            Ok(Removed::Replaced(loader.save(TreeChunk::Internal {
                bitmap,
                size,
                children,
            })?))
        }
    }
}

/// Append every node of the subtree to `out`, in trie order.
pub(crate) fn collect(loader: &ChunkLoader, hash: ObjectHash, out: &mut Vec<NodeData>) -> TreeResult<()> {
    let chunk = loader.load(&hash)?;
    match chunk.as_ref() {
        TreeChunk::Leaf { nodes } => out.extend(nodes.iter().cloned()),
        TreeChunk::Internal { children, .. } => {
            for child in children {
                collect(loader, *child, out)?;
            }
        }
    }
    Ok(())
}

/// A node that differs between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    Added(NodeData),
    Removed(NodeData),
    Changed { old: NodeData, new: NodeData },
}

impl NodeChange {
    pub fn id(&self) -> NodeId {
        match self {
            Self::Added(n) | Self::Removed(n) => n.id,
            Self::Changed { new, .. } => new.id,
        }
    }
}

/// Nodes that differ between two subtrees at the same level.
///
/// Subtrees with equal hashes are skipped without being loaded.
pub(crate) fn diff(
    loader: &ChunkLoader,
    old: Option<ObjectHash>,
    new: Option<ObjectHash>,
    level: u32,
    out: &mut Vec<NodeChange>,
) -> TreeResult<()> {
    if old == new {
        return Ok(());
    }
    let old_chunk = old.map(|h| loader.load(&h)).transpose()?;
    let new_chunk = new.map(|h| loader.load(&h)).transpose()?;

    if let (
        Some(TreeChunk::Internal {
            bitmap: old_bits,
            children: old_children,
            ..
        }),
        Some(TreeChunk::Internal {
            bitmap: new_bits,
            children: new_children,
            ..
        }),
    ) = (old_chunk.as_deref(), new_chunk.as_deref())
    {
        for s in 0..32u32 {
            let pick = |bits: u32, children: &[ObjectHash]| {
                (bits & (1 << s) != 0).then(|| children[child_index(bits, s)])
            };
            let (a, b) = (
                pick(*old_bits, old_children.as_slice()),
                pick(*new_bits, new_children.as_slice()),
            );
            if a.is_some() || b.is_some() {
                diff(loader, a, b, level + 1, out)?;
            }
        }
        return Ok(());
    }

    let mut old_nodes = Vec::new();
    let mut new_nodes = Vec::new();
    if let Some(h) = old {
        collect(loader, h, &mut old_nodes)?;
    }
    if let Some(h) = new {
        collect(loader, h, &mut new_nodes)?;
    }
    let mut old_by_id: BTreeMap<NodeId, NodeData> =
        old_nodes.into_iter().map(|n| (n.id, n)).collect();
    for node in new_nodes {
        match old_by_id.remove(&node.id) {
            None => out.push(NodeChange::Added(node)),
            Some(prev) if prev != node => out.push(NodeChange::Changed { old: prev, new: node }),
            Some(_) => {}
        }
    }
    out.extend(old_by_id.into_values().map(NodeChange::Removed));
    Ok(())
}
