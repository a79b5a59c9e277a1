//! Capturing what an operation meant, and replaying that meaning on a tree
//! that has since changed.
//!
//! An operation recorded against one tree may no longer fit another: its
//! target parent may be gone, its index out of range, or the node it edits
//! already deleted. An [`OperationIntent`] keeps enough of the original
//! context to turn the operation into zero or more operations that are
//! valid on the new tree:
//!
//! - edits of a node that no longer exists become no-ops
//! - a node added or moved below a removed parent is placed under the
//!   nearest ancestor of that parent that still exists
//! - indices are clamped to the current list length
//! - a move that would create a cycle is dropped
//! - removing a subtree first rescues nodes that were placed into it
//!   concurrently, moving them to the removed node's parent

use std::collections::BTreeSet;

use tracing::trace;

use arbor_tree::Tree;
use arbor_types::NodeId;

use crate::error::OpResult;
use crate::operation::{revert_operations, Operation, Position, TreeResolver};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Context {
    Plain,
    /// The target parent followed by its ancestors, each paired with the
    /// role that leads back down towards the target.
    Placement(Vec<(NodeId, String)>),
    /// Every node of the removed subtree.
    Subtree(BTreeSet<NodeId>),
}

/// An operation plus the context it was recorded in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationIntent {
    op: Operation,
    context: Context,
}

impl OperationIntent {
    /// Record the intent of `op` against `tree`, the tree it applies to.
    pub fn capture(op: &Operation, tree: &Tree) -> OpResult<Self> {
        let context = match op {
            Operation::AddChild { position, .. } => {
                Context::Placement(placement_chain(tree, position)?)
            }
            Operation::Move { target, .. } => Context::Placement(placement_chain(tree, target)?),
            Operation::Remove { node, .. } => {
                let mut subtree = BTreeSet::new();
                if tree.contains(*node)? {
                    for n in &tree.descendants(*node, true) {
                        subtree.insert(n?.id);
                    }
                }
                Context::Subtree(subtree)
            }
            _ => Context::Plain,
        };
        Ok(Self {
            op: op.clone(),
            context,
        })
    }

    pub fn original(&self) -> &Operation {
        &self.op
    }

    /// Operations that carry out this intent on `tree`.
    pub fn restore(&self, tree: &Tree) -> OpResult<Vec<Operation>> {
        let restored = match (&self.op, &self.context) {
            (
                Operation::AddChild {
                    position,
                    child,
                    concept,
                },
                Context::Placement(chain),
            ) => {
                if tree.contains(*child)? {
                    return Ok(Vec::new());
                }
                let Some((parent, role, exact)) = resolve_placement(tree, chain)? else {
                    return Ok(Vec::new());
                };
                let len = tree.children(parent, &role)?.len();
                let index = if exact { position.index.min(len) } else { len };
                vec![Operation::AddChild {
                    position: Position::new(parent, role, index),
                    child: *child,
                    concept: concept.clone(),
                }]
            }
            (Operation::Move { node, target, .. }, Context::Placement(chain)) => {
                let Some(source) = position_of(tree, *node)? else {
                    return Ok(Vec::new());
                };
                let Some((parent, role, exact)) = resolve_placement(tree, chain)? else {
                    return Ok(Vec::new());
                };
                if parent == *node || tree.ancestors(parent)?.contains(node) {
                    return Ok(Vec::new());
                }
                let mut len = tree.children(parent, &role)?.len();
                if source.parent == parent && source.role == role {
                    len -= 1;
                }
                let index = if exact { target.index.min(len) } else { len };
                vec![Operation::Move {
                    node: *node,
                    source,
                    target: Position::new(parent, role, index),
                }]
            }
            (Operation::Remove { node, .. }, Context::Subtree(captured)) => {
                let Some(position) = position_of(tree, *node)? else {
                    return Ok(Vec::new());
                };
                let mut ops = rescue_foreign_nodes(tree, *node, &position, captured)?;
                ops.push(Operation::Remove {
                    node: *node,
                    position,
                });
                ops
            }
            (
                Operation::SetProperty { node, .. } | Operation::SetReference { node, .. },
                _,
            ) => {
                if !tree.contains(*node)? {
                    return Ok(Vec::new());
                }
                vec![self.op.clone()]
            }
            (
                Operation::SetChildIndex {
                    parent,
                    role,
                    child,
                    index,
                },
                _,
            ) => {
                let Some(parent_node) = tree.get(*parent)? else {
                    return Ok(Vec::new());
                };
                let list = parent_node.child_ids(role);
                if !list.contains(child) {
                    return Ok(Vec::new());
                }
                vec![Operation::SetChildIndex {
                    parent: *parent,
                    role: role.clone(),
                    child: *child,
                    index: (*index).min(list.len() - 1),
                }]
            }
            _ => vec![self.op.clone()],
        };
        if restored.len() != 1 || restored[0] != self.op {
            trace!(original = %self.op, restored = restored.len(), "operation transformed");
        }
        Ok(restored)
    }
}

/// Capture the intents of `ops`, applying them one by one starting at
/// `base`. A `RevertTo` is expanded into the operations it stands for.
pub fn capture_intents(
    ops: &[Operation],
    base: &Tree,
    resolver: &dyn TreeResolver,
) -> OpResult<Vec<OperationIntent>> {
    let mut tree = base.clone();
    let mut intents = Vec::with_capacity(ops.len());
    for op in ops {
        if let Operation::RevertTo {
            latest_known,
            target,
        } = op
        {
            let expanded = revert_operations(resolver, latest_known, target)?;
            let from = resolver.resolve_tree(latest_known)?;
            let sub = capture_intents(&expanded, &from, resolver)?;
            tree = replay_intents(&sub, &tree, resolver)?.0;
            intents.extend(sub);
        } else {
            intents.push(OperationIntent::capture(op, &tree)?);
            tree = op.apply(&tree, resolver)?;
        }
    }
    Ok(intents)
}

/// Restore and apply `intents` in order. Returns the final tree and the
/// operations that were actually applied.
pub fn replay_intents(
    intents: &[OperationIntent],
    tree: &Tree,
    resolver: &dyn TreeResolver,
) -> OpResult<(Tree, Vec<Operation>)> {
    let mut tree = tree.clone();
    let mut applied = Vec::new();
    for intent in intents {
        for op in intent.restore(&tree)? {
            tree = op.apply(&tree, resolver)?;
            applied.push(op);
        }
    }
    Ok((tree, applied))
}

fn placement_chain(tree: &Tree, target: &Position) -> OpResult<Vec<(NodeId, String)>> {
    let mut chain = vec![(target.parent, target.role.clone())];
    let mut current = target.parent;
    while let Some(node) = tree.get(current)? {
        let Some(parent) = node.parent else { break };
        if chain.iter().any(|(n, _)| *n == parent) {
            break;
        }
        chain.push((parent, node.role_in_parent.unwrap_or_default()));
        current = parent;
    }
    Ok(chain)
}

/// First entry of `chain` that still exists. The flag is `true` when it is
/// the original target parent.
fn resolve_placement(
    tree: &Tree,
    chain: &[(NodeId, String)],
) -> OpResult<Option<(NodeId, String, bool)>> {
    for (i, (node, role)) in chain.iter().enumerate() {
        if tree.contains(*node)? {
            return Ok(Some((*node, role.clone(), i == 0)));
        }
    }
    Ok(None)
}

/// Current position of `node`; `None` for missing or parentless nodes.
pub(crate) fn position_of(tree: &Tree, node: NodeId) -> OpResult<Option<Position>> {
    let Some(data) = tree.get(node)? else {
        return Ok(None);
    };
    let Some(parent) = data.parent else {
        return Ok(None);
    };
    let position = tree
        .get(parent)?
        .and_then(|p| p.position_of(node))
        .map(|(role, index)| Position::new(parent, role, index));
    Ok(position)
}

fn rescue_foreign_nodes(
    tree: &Tree,
    removed: NodeId,
    position: &Position,
    captured: &BTreeSet<NodeId>,
) -> OpResult<Vec<Operation>> {
    let mut foreign = Vec::new();
    for n in &tree.descendants(removed, false) {
        let n = n?;
        let parent_captured = n.parent.is_some_and(|p| captured.contains(&p));
        if !captured.contains(&n.id) && parent_captured {
            foreign.push(n.id);
        }
    }
    foreign.sort();

    let base_len = tree.children(position.parent, &position.role)?.len();
    let mut ops = Vec::with_capacity(foreign.len());
    for node in foreign {
        if let Some(source) = position_of(tree, node)? {
            let index = base_len + ops.len();
            ops.push(Operation::Move {
                node,
                source,
                target: Position::new(position.parent, position.role.clone(), index),
            });
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::NoVersions;
    use arbor_store::InMemoryObjectStore;
    use arbor_tree::ChunkLoader;
    use std::sync::Arc;

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn apply_all(tree: &Tree, ops: &[Operation]) -> Tree {
        ops.iter()
            .fold(tree.clone(), |t, op| op.apply(&t, &NoVersions).unwrap())
    }

    fn add(parent: u64, role: &str, index: usize, child: u64) -> Operation {
        Operation::AddChild {
            position: Position::new(id(parent), role, index),
            child: id(child),
            concept: None,
        }
    }

    fn remove(tree: &Tree, node: u64) -> Operation {
        Operation::Remove {
            node: id(node),
            position: position_of(tree, id(node)).unwrap().unwrap(),
        }
    }

    /// root -> items: [10, 11]; 10 -> sub: [20]
    fn base() -> Tree {
        let store = Arc::new(InMemoryObjectStore::new());
        let tree = Tree::create(Arc::new(ChunkLoader::new(store, 1000))).unwrap();
        apply_all(
            &tree,
            &[add(1, "items", 0, 10), add(1, "items", 1, 11), add(10, "sub", 0, 20)],
        )
    }

    /// Capture `ops` on `base`, then replay them on `other`.
    fn rebase(base: &Tree, ops: &[Operation], other: &Tree) -> (Tree, Vec<Operation>) {
        let intents = capture_intents(ops, base, &NoVersions).unwrap();
        replay_intents(&intents, other, &NoVersions).unwrap()
    }

    // ---- unchanged context ----

    #[test]
    fn intents_replay_verbatim_on_their_own_base() {
        let base = base();
        let ops = vec![add(20, "deep", 0, 30), add(11, "x", 0, 31)];
        let (tree, applied) = rebase(&base, &ops, &base);
        assert_eq!(applied, ops);
        assert_eq!(tree.hash(), apply_all(&base, &ops).hash());
    }

    // ---- orphan reparenting ----

    #[test]
    fn add_below_removed_node_goes_to_nearest_surviving_ancestor() {
        let base = base();
        let theirs = apply_all(&base, &[remove(&base, 20)]);
        let (tree, applied) = rebase(&base, &[add(20, "deep", 0, 30)], &theirs);
        assert_eq!(tree.require(id(30)).unwrap().parent, Some(id(10)));
        assert_eq!(tree.children(id(10), "sub").unwrap(), vec![id(30)]);
        assert!(matches!(&applied[0], Operation::AddChild { position, .. } if position.parent == id(10)));
    }

    #[test]
    fn move_into_removed_subtree_is_redirected() {
        let base = base();
        let theirs = apply_all(&base, &[remove(&base, 10)]);
        let mv = Operation::Move {
            node: id(11),
            source: Position::new(id(1), "items", 1),
            target: Position::new(id(20), "deep", 0),
        };
        let (tree, _) = rebase(&base, &[mv], &theirs);
        assert_eq!(tree.require(id(11)).unwrap().parent, Some(NodeId::ROOT));
        assert_eq!(tree.children(NodeId::ROOT, "items").unwrap(), vec![id(11)]);
    }

    #[test]
    fn remove_rescues_concurrently_added_children() {
        let base = base();
        let theirs = apply_all(&base, &[add(20, "deep", 0, 30)]);
        let (tree, applied) = rebase(&base, &[remove(&base, 10)], &theirs);
        assert!(!tree.contains(id(10)).unwrap());
        assert!(!tree.contains(id(20)).unwrap());
        assert_eq!(tree.require(id(30)).unwrap().parent, Some(NodeId::ROOT));
        assert_eq!(applied.len(), 2);
    }

    // ---- no-ops ----

    #[test]
    fn edits_of_removed_nodes_are_dropped() {
        let base = base();
        let theirs = apply_all(&base, &[remove(&base, 10)]);
        let ops = vec![
            Operation::SetProperty {
                node: id(20),
                role: "name".into(),
                value: Some("x".into()),
            },
            Operation::SetChildIndex {
                parent: id(10),
                role: "sub".into(),
                child: id(20),
                index: 0,
            },
            remove(&base, 20),
        ];
        let (tree, applied) = rebase(&base, &ops, &theirs);
        assert!(applied.is_empty());
        assert_eq!(tree.hash(), theirs.hash());
    }

    #[test]
    fn move_creating_cycle_is_dropped() {
        let base = base();
        // theirs: 11 moved below 20
        let theirs = apply_all(
            &base,
            &[Operation::Move {
                node: id(11),
                source: Position::new(id(1), "items", 1),
                target: Position::new(id(20), "deep", 0),
            }],
        );
        // ours: 10 moved below 11
        let mv = Operation::Move {
            node: id(10),
            source: Position::new(id(1), "items", 0),
            target: Position::new(id(11), "x", 0),
        };
        let (tree, applied) = rebase(&base, &[mv], &theirs);
        assert!(applied.is_empty());
        assert_eq!(tree.hash(), theirs.hash());
    }

    #[test]
    fn indices_are_clamped() {
        let base = base();
        let theirs = apply_all(&base, &[remove(&base, 11)]);
        let (tree, applied) = rebase(&base, &[add(1, "items", 2, 40)], &theirs);
        assert_eq!(tree.children(NodeId::ROOT, "items").unwrap(), vec![id(10), id(40)]);
        assert!(matches!(&applied[0], Operation::AddChild { position, .. } if position.index == 1));
    }

    #[test]
    fn duplicate_add_is_skipped() {
        let base = base();
        let theirs = apply_all(&base, &[add(1, "items", 0, 50)]);
        let (_, applied) = rebase(&base, &[add(11, "x", 0, 50)], &theirs);
        assert!(applied.is_empty());
    }
}
