use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use arbor_store::BulkQuery;
use arbor_types::{NodeId, ObjectHash};

use crate::chunk::TreeChunk;
use crate::error::{TreeError, TreeResult};
use crate::hamt::{self, NodeChange, Removed};
use crate::loader::ChunkLoader;
use crate::node::NodeData;
use crate::traversal::{AllChildren, Descendants};

/// An immutable snapshot of a model.
///
/// A tree is just the hash of its root chunk plus the loader used to reach
/// the rest; cloning it is cheap. Every edit returns a new `Tree` and leaves
/// `self` untouched.
#[derive(Clone)]
pub struct Tree {
    root: ObjectHash,
    loader: Arc<ChunkLoader>,
}

impl Tree {
    /// A tree containing only the root node.
    pub fn create(loader: Arc<ChunkLoader>) -> TreeResult<Self> {
        let root = loader.save(TreeChunk::Leaf {
            nodes: vec![NodeData::root()],
        })?;
        Ok(Self { root, loader })
    }

    /// A tree with no nodes at all.
    pub fn empty(loader: Arc<ChunkLoader>) -> TreeResult<Self> {
        let root = loader.save(TreeChunk::empty())?;
        Ok(Self { root, loader })
    }

    /// Refer to an already stored tree. Nothing is fetched until it is read.
    pub fn load(loader: Arc<ChunkLoader>, root: ObjectHash) -> Self {
        Self { root, loader }
    }

    pub fn hash(&self) -> ObjectHash {
        self.root
    }

    pub fn loader(&self) -> &Arc<ChunkLoader> {
        &self.loader
    }

    fn with_root(&self, root: ObjectHash) -> Self {
        Self {
            root,
            loader: Arc::clone(&self.loader),
        }
    }

    // ---- reads ----

    /// `Ok(None)` if the node does not exist; a missing chunk is an error.
    pub fn get(&self, id: NodeId) -> TreeResult<Option<NodeData>> {
        hamt::get(&self.loader, self.root, id)
    }

    pub fn require(&self, id: NodeId) -> TreeResult<NodeData> {
        self.get(id)?.ok_or(TreeError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> TreeResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Ordered children of `id` in `role`.
    pub fn children(&self, id: NodeId, role: &str) -> TreeResult<Vec<NodeId>> {
        Ok(self.require(id)?.child_ids(role).to_vec())
    }

    pub fn all_child_ids(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        Ok(self.require(id)?.all_child_ids())
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut current = self.require(id)?.parent;
        while let Some(parent) = current {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.get(parent)?.and_then(|n| n.parent);
        }
        Ok(chain)
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> TreeResult<u64> {
        Ok(self.loader.load(&self.root)?.size())
    }

    /// Chunks from the root to the one holding `id`.
    pub fn chunk_path(&self, id: NodeId) -> TreeResult<Vec<ObjectHash>> {
        hamt::path(&self.loader, self.root, id)
    }

    /// Lazy sequence of `id` (optionally) and everything below it.
    pub fn descendants(&self, id: NodeId, include_self: bool) -> Descendants {
        Descendants::new(self.clone(), id, include_self)
    }

    /// Lazy sequence of the children of `id` in role and list order.
    pub fn all_children(&self, id: NodeId) -> AllChildren {
        AllChildren::new(self.clone(), id)
    }

    /// Every chunk hash of the tree, fetched with batched reads.
    pub fn chunk_hashes(&self) -> TreeResult<Vec<ObjectHash>> {
        Ok(self.walk_chunks(&HashSet::new())?.0)
    }

    /// Every node of the tree, in trie order.
    pub fn nodes(&self) -> TreeResult<Vec<NodeData>> {
        Ok(self.walk_chunks(&HashSet::new())?.1)
    }

    /// Chunks of this tree that are not in `known`. Subtrees whose hash is
    /// known are not descended into.
    pub fn chunks_excluding(&self, known: &HashSet<ObjectHash>) -> TreeResult<Vec<ObjectHash>> {
        Ok(self.walk_chunks(known)?.0)
    }

    fn walk_chunks(&self, known: &HashSet<ObjectHash>) -> TreeResult<(Vec<ObjectHash>, Vec<NodeData>)> {
        let walk = Rc::new(RefCell::new(ChunkWalk::default()));
        let mut query = BulkQuery::new(self.loader.store());
        if !known.contains(&self.root) {
            visit_chunk(&self.loader, &mut query, self.root, Rc::new(known.clone()), Rc::clone(&walk));
        }
        query.flush();
        drop(query);
        let walk = walk.take();
        debug!(
            tree = %self.root.short_hex(),
            chunks = walk.hashes.len(),
            nodes = walk.nodes.len(),
            "walked tree chunks"
        );
        match walk.error {
            Some(err) => Err(err),
            None => Ok((walk.hashes, walk.nodes)),
        }
    }

    /// Nodes that differ from `base`, comparing chunk hashes top down.
    pub fn changes_since(&self, base: &Tree) -> TreeResult<Vec<NodeChange>> {
        let mut out = Vec::new();
        hamt::diff(&self.loader, Some(base.root), Some(self.root), 0, &mut out)?;
        out.sort_by_key(NodeChange::id);
        Ok(out)
    }

    // ---- raw writes ----

    /// Insert or replace a node record as is.
    pub fn set(&self, node: NodeData) -> TreeResult<Tree> {
        let (root, _) = hamt::put(&self.loader, self.root, 0, node)?;
        Ok(self.with_root(root))
    }

    /// Apply `mutation` to an existing node.
    pub fn update<F>(&self, id: NodeId, mutation: F) -> TreeResult<Tree>
    where
        F: FnOnce(&mut NodeData),
    {
        let mut node = self.require(id)?;
        mutation(&mut node);
        node.id = id;
        self.set(node)
    }

    pub fn set_all<I>(&self, nodes: I) -> TreeResult<Tree>
    where
        I: IntoIterator<Item = NodeData>,
    {
        let mut root = self.root;
        for node in nodes {
            root = hamt::put(&self.loader, root, 0, node)?.0;
        }
        Ok(self.with_root(root))
    }

    /// Drop a node record. Links to it from other nodes are not touched.
    pub fn remove(&self, id: NodeId) -> TreeResult<Tree> {
        self.remove_all([id])
    }

    pub fn remove_all<I>(&self, ids: I) -> TreeResult<Tree>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut root = self.root;
        for id in ids {
            root = match hamt::remove(&self.loader, root, 0, id)? {
                Removed::NotFound => root,
                Removed::Replaced(hash) => hash,
                Removed::Empty => self.loader.save(TreeChunk::empty())?,
            };
        }
        Ok(self.with_root(root))
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for Tree {}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").field("root", &self.root).finish()
    }
}

#[derive(Default)]
struct ChunkWalk {
    hashes: Vec<ObjectHash>,
    nodes: Vec<NodeData>,
    error: Option<TreeError>,
}

fn visit_chunk<'s>(
    loader: &Arc<ChunkLoader>,
    query: &mut BulkQuery<'s>,
    hash: ObjectHash,
    known: Rc<HashSet<ObjectHash>>,
    walk: Rc<RefCell<ChunkWalk>>,
) {
    let next = Arc::clone(loader);
    loader.request(query, hash, move |q, chunk| {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                walk.borrow_mut().error.get_or_insert(err);
                return;
            }
        };
        walk.borrow_mut().hashes.push(hash);
        match chunk.as_ref() {
            TreeChunk::Leaf { nodes } => walk.borrow_mut().nodes.extend(nodes.iter().cloned()),
            TreeChunk::Internal { children, .. } => {
                for child in children.iter().filter(|c| !known.contains(c)) {
                    visit_chunk(&next, q, *child, Rc::clone(&known), Rc::clone(&walk));
                }
            }
        }
    });
}
