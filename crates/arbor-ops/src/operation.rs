use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use arbor_tree::Tree;
use arbor_types::{NodeId, NodeReference, ObjectHash};

use crate::diff::diff;
use crate::error::{OpError, OpResult};
use crate::intent::{capture_intents, replay_intents};

/// Where a node sits: the `index`-th child in `role` of `parent`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub parent: NodeId,
    pub role: String,
    pub index: usize,
}

impl Position {
    pub fn new(parent: NodeId, role: impl Into<String>, index: usize) -> Self {
        Self {
            parent,
            role: role.into(),
            index,
        }
    }
}

/// One recorded edit.
///
/// Operations carry the positions they read, not only the ones they write,
/// so that two operations recorded by different writers can be checked for
/// interference and rebased onto each other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Create `child` at `position`.
    AddChild {
        position: Position,
        child: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        concept: Option<String>,
    },
    /// Delete `node` and its subtree. `position` is where it was.
    Remove { node: NodeId, position: Position },
    /// Detach `node` from `source` and insert it at `target`. The target
    /// index is interpreted after the node has been detached.
    Move {
        node: NodeId,
        source: Position,
        target: Position,
    },
    SetProperty {
        node: NodeId,
        role: String,
        value: Option<String>,
    },
    SetReference {
        node: NodeId,
        role: String,
        target: Option<NodeReference>,
    },
    /// Reorder `child` inside the `role` list of `parent`.
    SetChildIndex {
        parent: NodeId,
        role: String,
        child: NodeId,
        index: usize,
    },
    /// Undo every change made between version `target` and version
    /// `latest_known`, keeping changes made concurrently by others.
    RevertTo {
        latest_known: ObjectHash,
        target: ObjectHash,
    },
}

/// Resolves version hashes to their trees. Needed by [`Operation::RevertTo`].
pub trait TreeResolver {
    fn resolve_tree(&self, version: &ObjectHash) -> OpResult<Tree>;
}

/// A resolver that knows no versions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVersions;

impl TreeResolver for NoVersions {
    fn resolve_tree(&self, version: &ObjectHash) -> OpResult<Tree> {
        Err(OpError::VersionNotFound(*version))
    }
}

impl Operation {
    /// Apply the operation to `tree`, returning the new tree.
    pub fn apply(&self, tree: &Tree, resolver: &dyn TreeResolver) -> OpResult<Tree> {
        let next = match self {
            Self::AddChild {
                position,
                child,
                concept,
            } => tree.add_new_child(
                position.parent,
                &position.role,
                position.index,
                *child,
                concept.clone(),
            )?,
            Self::Remove { node, .. } => tree.delete_subtree(*node)?,
            Self::Move { node, target, .. } => {
                tree.move_child(*node, target.parent, &target.role, target.index)?
            }
            Self::SetProperty { node, role, value } => {
                tree.set_property(*node, role, value.clone())?
            }
            Self::SetReference { node, role, target } => {
                tree.set_reference(*node, role, target.clone())?
            }
            Self::SetChildIndex {
                parent,
                role,
                child,
                index,
            } => tree.set_child_index(*parent, role, *child, *index)?,
            Self::RevertTo {
                latest_known,
                target,
            } => {
                let ops = revert_operations(resolver, latest_known, target)?;
                let from = resolver.resolve_tree(latest_known)?;
                let intents = capture_intents(&ops, &from, resolver)?;
                replay_intents(&intents, tree, resolver)?.0
            }
        };
        Ok(next)
    }

    /// Nodes whose state this operation reads or writes.
    pub fn touched_nodes(&self) -> BTreeSet<NodeId> {
        let mut nodes = BTreeSet::new();
        match self {
            Self::AddChild {
                position, child, ..
            } => {
                nodes.insert(position.parent);
                nodes.insert(*child);
            }
            Self::Remove { node, position } => {
                nodes.insert(*node);
                nodes.insert(position.parent);
            }
            Self::Move {
                node,
                source,
                target,
            } => {
                nodes.insert(*node);
                nodes.insert(source.parent);
                nodes.insert(target.parent);
            }
            Self::SetProperty { node, .. } | Self::SetReference { node, .. } => {
                nodes.insert(*node);
            }
            Self::SetChildIndex { parent, child, .. } => {
                nodes.insert(*parent);
                nodes.insert(*child);
            }
            Self::RevertTo { .. } => {}
        }
        nodes
    }

    /// Whether replaying `self` and `other` in different orders may give
    /// different results.
    ///
    /// Two property or reference writes conflict only on the same role.
    /// `RevertTo` conflicts with everything since its extent is only known
    /// once versions are resolved.
    pub fn conflicts_with(&self, other: &Operation) -> bool {
        match (self, other) {
            (Self::RevertTo { .. }, _) | (_, Self::RevertTo { .. }) => true,
            (
                Self::SetProperty { node: a, role: ra, .. },
                Self::SetProperty { node: b, role: rb, .. },
            )
            | (
                Self::SetReference { node: a, role: ra, .. },
                Self::SetReference { node: b, role: rb, .. },
            ) => a == b && ra == rb,
            (
                Self::SetProperty { .. } | Self::SetReference { .. },
                Self::SetProperty { .. } | Self::SetReference { .. },
            ) => false,
            _ => !self.touched_nodes().is_disjoint(&other.touched_nodes()),
        }
    }
}

/// Operations that turn the tree of `latest_known` back into the tree of
/// `target`.
pub fn revert_operations(
    resolver: &dyn TreeResolver,
    latest_known: &ObjectHash,
    target: &ObjectHash,
) -> OpResult<Vec<Operation>> {
    let from = resolver.resolve_tree(latest_known)?;
    let to = resolver.resolve_tree(target)?;
    diff(&from, &to)
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddChild {
                position, child, ..
            } => write!(
                f,
                "add {child} at {}.{}[{}]",
                position.parent, position.role, position.index
            ),
            Self::Remove { node, .. } => write!(f, "remove {node}"),
            Self::Move { node, target, .. } => write!(
                f,
                "move {node} to {}.{}[{}]",
                target.parent, target.role, target.index
            ),
            Self::SetProperty { node, role, value } => {
                write!(f, "set {node}.{role} = {value:?}")
            }
            Self::SetReference { node, role, target } => {
                write!(f, "set {node}.{role} -> {target:?}")
            }
            Self::SetChildIndex {
                parent,
                role,
                child,
                index,
            } => write!(f, "reorder {child} to {parent}.{role}[{index}]"),
            Self::RevertTo {
                latest_known,
                target,
            } => write!(
                f,
                "revert {} to {}",
                latest_known.short_hex(),
                target.short_hex()
            ),
        }
    }
}
