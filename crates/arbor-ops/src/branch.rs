use arbor_tree::Tree;
use arbor_types::{NodeId, NodeReference, ObjectHash};

use crate::error::{OpError, OpResult};
use crate::intent::position_of;
use crate::operation::{NoVersions, Operation, Position, TreeResolver};

/// A mutable edit session over an immutable tree.
///
/// Edits are made inside [`run_write`](Self::run_write) scopes. A scope that
/// returns an error leaves both the tree and the pending operations as they
/// were before it started.
pub struct WorkingBranch<'r> {
    tree: Tree,
    pending: Vec<Operation>,
    resolver: &'r dyn TreeResolver,
}

impl WorkingBranch<'static> {
    /// A branch that cannot resolve versions, so `revert_to` fails.
    pub fn new(tree: Tree) -> Self {
        Self::with_resolver(tree, &NoVersions)
    }
}

impl<'r> WorkingBranch<'r> {
    pub fn with_resolver(tree: Tree, resolver: &'r dyn TreeResolver) -> Self {
        Self {
            tree,
            pending: Vec::new(),
            resolver,
        }
    }

    /// The tree including every committed write scope.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Run a batch of edits atomically.
    pub fn run_write<T, F>(&mut self, f: F) -> OpResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> OpResult<T>,
    {
        let mut tx = WriteTransaction {
            tree: self.tree.clone(),
            ops: Vec::new(),
            resolver: self.resolver,
        };
        let value = f(&mut tx)?;
        self.tree = tx.tree;
        self.pending.extend(tx.ops);
        Ok(value)
    }

    /// Take the operations recorded since the last call together with the
    /// tree they produce. The tree stays the branch's current state.
    pub fn get_pending_changes(&mut self) -> (Vec<Operation>, Tree) {
        (std::mem::take(&mut self.pending), self.tree.clone())
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl std::fmt::Debug for WorkingBranch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingBranch")
            .field("tree", &self.tree)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// The edit surface inside a write scope. Every method records exactly the
/// operation it applies.
pub struct WriteTransaction<'r> {
    tree: Tree,
    ops: Vec<Operation>,
    resolver: &'r dyn TreeResolver,
}

impl WriteTransaction<'_> {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Apply and record an arbitrary operation.
    pub fn apply(&mut self, op: Operation) -> OpResult<()> {
        self.tree = op.apply(&self.tree, self.resolver)?;
        self.ops.push(op);
        Ok(())
    }

    pub fn add_new_child(
        &mut self,
        parent: NodeId,
        role: &str,
        index: usize,
        child: NodeId,
        concept: Option<String>,
    ) -> OpResult<()> {
        self.apply(Operation::AddChild {
            position: Position::new(parent, role, index),
            child,
            concept,
        })
    }

    /// Append `child` at the end of `role`.
    pub fn add_child_last(
        &mut self,
        parent: NodeId,
        role: &str,
        child: NodeId,
        concept: Option<String>,
    ) -> OpResult<()> {
        let index = self.tree.children(parent, role)?.len();
        self.add_new_child(parent, role, index, child, concept)
    }

    pub fn move_child(&mut self, node: NodeId, parent: NodeId, role: &str, index: usize) -> OpResult<()> {
        let source = self.require_position(node)?;
        self.apply(Operation::Move {
            node,
            source,
            target: Position::new(parent, role, index),
        })
    }

    pub fn delete_node(&mut self, node: NodeId) -> OpResult<()> {
        let position = self.require_position(node)?;
        self.apply(Operation::Remove { node, position })
    }

    pub fn set_property(&mut self, node: NodeId, role: &str, value: Option<String>) -> OpResult<()> {
        self.apply(Operation::SetProperty {
            node,
            role: role.to_string(),
            value,
        })
    }

    pub fn set_reference(
        &mut self,
        node: NodeId,
        role: &str,
        target: Option<NodeReference>,
    ) -> OpResult<()> {
        self.apply(Operation::SetReference {
            node,
            role: role.to_string(),
            target,
        })
    }

    pub fn set_child_index(&mut self, parent: NodeId, role: &str, child: NodeId, index: usize) -> OpResult<()> {
        self.apply(Operation::SetChildIndex {
            parent,
            role: role.to_string(),
            child,
            index,
        })
    }

    /// Undo the changes between `target` and `latest_known`.
    pub fn revert_to(&mut self, latest_known: ObjectHash, target: ObjectHash) -> OpResult<()> {
        self.apply(Operation::RevertTo {
            latest_known,
            target,
        })
    }

    fn require_position(&self, node: NodeId) -> OpResult<Position> {
        match position_of(&self.tree, node)? {
            Some(position) => Ok(position),
            None if node.is_root() => Err(arbor_tree::TreeError::RootImmutable.into()),
            None => Err(OpError::Tree(arbor_tree::TreeError::NodeNotFound(node))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::InMemoryObjectStore;
    use arbor_tree::{ChunkLoader, TreeError};
    use std::sync::Arc;

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn branch() -> WorkingBranch<'static> {
        let store = Arc::new(InMemoryObjectStore::new());
        WorkingBranch::new(Tree::create(Arc::new(ChunkLoader::new(store, 1000))).unwrap())
    }

    // ---- write scopes ----

    #[test]
    fn pending_changes_replay_to_the_same_tree() {
        let mut branch = branch();
        let base = branch.tree().clone();
        branch
            .run_write(|tx| {
                tx.add_child_last(NodeId::ROOT, "items", id(10), Some("Item".into()))?;
                tx.add_child_last(NodeId::ROOT, "items", id(11), None)?;
                tx.set_property(id(10), "name", Some("ten".into()))?;
                tx.move_child(id(11), id(10), "sub", 0)
            })
            .unwrap();
        branch
            .run_write(|tx| tx.set_reference(id(10), "first", Some(NodeReference::Local(id(11)))))
            .unwrap();

        let (ops, tree) = branch.get_pending_changes();
        assert_eq!(ops.len(), 5);
        let replayed = ops
            .iter()
            .fold(base, |t, op| op.apply(&t, &NoVersions).unwrap());
        assert_eq!(replayed.hash(), tree.hash());

        assert!(!branch.has_pending_changes());
        assert_eq!(branch.tree().hash(), tree.hash());
    }

    #[test]
    fn failed_scope_is_discarded() {
        let mut branch = branch();
        branch
            .run_write(|tx| tx.add_child_last(NodeId::ROOT, "items", id(10), None))
            .unwrap();
        let before = branch.tree().hash();
        let result = branch.run_write(|tx| {
            tx.add_child_last(NodeId::ROOT, "items", id(11), None)?;
            tx.delete_node(id(99))
        });
        assert!(matches!(result, Err(OpError::Tree(TreeError::NodeNotFound(_)))));
        assert_eq!(branch.tree().hash(), before);
        assert_eq!(branch.get_pending_changes().0.len(), 1);
    }

    #[test]
    fn root_cannot_be_deleted() {
        let mut branch = branch();
        let result = branch.run_write(|tx| tx.delete_node(NodeId::ROOT));
        assert!(matches!(result, Err(OpError::Tree(TreeError::RootImmutable))));
    }

    #[test]
    fn scope_returns_value() {
        let mut branch = branch();
        let size = branch
            .run_write(|tx| {
                tx.add_child_last(NodeId::ROOT, "a", id(5), None)?;
                Ok(tx.tree().size()?)
            })
            .unwrap();
        assert_eq!(size, 2);
    }
}
