//! Lazy, batched sequences over a tree.
//!
//! Each sequence value is a recipe; every call to `iter()` starts a fresh
//! [`BulkQuery`] and pumps it only as far as needed to produce the next
//! item. Node lookups issued while walking share store round trips, and
//! chunks resolved from the cache never touch the store at all.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use arbor_store::BulkQuery;
use arbor_types::{NodeId, ObjectHash};

use crate::chunk::TreeChunk;
use crate::error::{TreeError, TreeResult};
use crate::loader::ChunkLoader;
use crate::node::NodeData;
use crate::tree::Tree;

/// Resolve `id` starting from the chunk `hash` at `level`.
pub(crate) fn lookup<'s, F>(
    loader: &Arc<ChunkLoader>,
    query: &mut BulkQuery<'s>,
    hash: ObjectHash,
    level: u32,
    id: NodeId,
    then: F,
) where
    F: FnOnce(&mut BulkQuery<'s>, TreeResult<Option<NodeData>>) + 's,
{
    let next = Arc::clone(loader);
    loader.request(query, hash, move |q, chunk| match chunk {
        Err(err) => then(q, Err(err)),
        Ok(chunk) => match chunk.as_ref() {
            TreeChunk::Leaf { .. } => then(q, Ok(chunk.find(id).cloned())),
            TreeChunk::Internal { .. } => match chunk.child_for(id, level) {
                Some(child) => lookup(&next, q, child, level + 1, id, then),
                None => then(q, Ok(None)),
            },
        },
    });
}

type Buffer = Rc<RefCell<VecDeque<TreeResult<NodeData>>>>;

/// A node and everything below it.
///
/// The emission order is depth-first but otherwise unspecified; it is
/// deterministic for a given tree and cache state.
#[derive(Clone, Debug)]
pub struct Descendants {
    tree: Tree,
    root: NodeId,
    include_self: bool,
}

impl Descendants {
    pub fn new(tree: Tree, root: NodeId, include_self: bool) -> Self {
        Self {
            tree,
            root,
            include_self,
        }
    }

    pub fn iter(&self) -> DescendantsIter<'_> {
        let buffer: Buffer = Rc::default();
        let mut query = BulkQuery::new(self.tree.loader().store());
        visit(
            self.tree.loader(),
            &mut query,
            self.tree.hash(),
            self.root,
            None,
            self.include_self,
            Rc::clone(&buffer),
        );
        DescendantsIter {
            query,
            buffer,
            done: false,
        }
    }

    /// Drain the sequence, stopping at the first error.
    pub fn collect_nodes(&self) -> TreeResult<Vec<NodeData>> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a Descendants {
    type Item = TreeResult<NodeData>;
    type IntoIter = DescendantsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn visit<'s>(
    loader: &Arc<ChunkLoader>,
    query: &mut BulkQuery<'s>,
    root: ObjectHash,
    id: NodeId,
    parent: Option<NodeId>,
    emit: bool,
    buffer: Buffer,
) {
    let next = Arc::clone(loader);
    lookup(loader, query, root, 0, id, move |q, found| {
        let node = match (found, parent) {
            (Ok(Some(node)), _) => node,
            (Ok(None), Some(parent)) => {
                buffer
                    .borrow_mut()
                    .push_back(Err(TreeError::DanglingChild { parent, child: id }));
                return;
            }
            (Ok(None), None) => {
                buffer.borrow_mut().push_back(Err(TreeError::NodeNotFound(id)));
                return;
            }
            (Err(err), _) => {
                buffer.borrow_mut().push_back(Err(err));
                return;
            }
        };
        for child in node.all_child_ids() {
            visit(&next, q, root, child, Some(node.id), true, Rc::clone(&buffer));
        }
        if emit {
            buffer.borrow_mut().push_back(Ok(node));
        }
    });
}

/// Iterator over [`Descendants`]. Ends after the first error.
pub struct DescendantsIter<'a> {
    query: BulkQuery<'a>,
    buffer: Buffer,
    done: bool,
}

impl Iterator for DescendantsIter<'_> {
    type Item = TreeResult<NodeData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(item) = self.buffer.borrow_mut().pop_front() {
                self.done = item.is_err();
                return Some(item);
            }
            if !self.query.step() {
                self.done = true;
                return None;
            }
        }
    }
}

/// Children of a node across all roles, in role order then list order.
#[derive(Clone, Debug)]
pub struct AllChildren {
    tree: Tree,
    parent: NodeId,
}

#[derive(Default)]
struct Slots {
    items: Vec<Option<TreeResult<NodeData>>>,
    /// Set once the parent has been resolved.
    expected: Option<usize>,
    failure: Option<TreeError>,
}

impl AllChildren {
    pub fn new(tree: Tree, parent: NodeId) -> Self {
        Self { tree, parent }
    }

    pub fn iter(&self) -> AllChildrenIter<'_> {
        let slots: Rc<RefCell<Slots>> = Rc::default();
        let mut query = BulkQuery::new(self.tree.loader().store());
        let loader = Arc::clone(self.tree.loader());
        let root = self.tree.hash();
        let parent = self.parent;
        let state = Rc::clone(&slots);
        lookup(self.tree.loader(), &mut query, root, 0, parent, move |q, found| {
            let node = match found {
                Ok(Some(node)) => node,
                Ok(None) => {
                    state.borrow_mut().failure = Some(TreeError::NodeNotFound(parent));
                    return;
                }
                Err(err) => {
                    state.borrow_mut().failure = Some(err);
                    return;
                }
            };
            let children = node.all_child_ids();
            {
                let mut s = state.borrow_mut();
                s.expected = Some(children.len());
                s.items = (0..children.len()).map(|_| None).collect();
            }
            for (index, child) in children.into_iter().enumerate() {
                let state = Rc::clone(&state);
                lookup(&loader, q, root, 0, child, move |_, found| {
                    let item = match found {
                        Ok(Some(node)) => Ok(node),
                        Ok(None) => Err(TreeError::DanglingChild { parent, child }),
                        Err(err) => Err(err),
                    };
                    state.borrow_mut().items[index] = Some(item);
                });
            }
        });
        AllChildrenIter {
            query,
            slots,
            cursor: 0,
            done: false,
        }
    }

    pub fn collect_nodes(&self) -> TreeResult<Vec<NodeData>> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a AllChildren {
    type Item = TreeResult<NodeData>;
    type IntoIter = AllChildrenIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`AllChildren`]. Ends after the first error.
pub struct AllChildrenIter<'a> {
    query: BulkQuery<'a>,
    slots: Rc<RefCell<Slots>>,
    cursor: usize,
    done: bool,
}

impl Iterator for AllChildrenIter<'_> {
    type Item = TreeResult<NodeData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            {
                let mut slots = self.slots.borrow_mut();
                if let Some(err) = slots.failure.take() {
                    self.done = true;
                    return Some(Err(err));
                }
                if slots.expected.is_some_and(|n| self.cursor >= n) {
                    self.done = true;
                    return None;
                }
                if let Some(item) = slots.items.get_mut(self.cursor).and_then(Option::take) {
                    self.cursor += 1;
                    self.done = item.is_err();
                    return Some(item);
                }
            }
            if !self.query.step() {
                self.done = true;
                return None;
            }
        }
    }
}
