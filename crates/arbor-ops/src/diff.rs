//! Deriving operations from two trees.
//!
//! [`diff`] compares chunk hashes top down to find the nodes that differ,
//! then emits operations in an order that is always valid:
//!
//! 1. new and re-parented nodes, parents before children, appended at the
//!    end of their target list
//! 2. removal of the topmost nodes that no longer exist
//! 3. reordering of child lists
//! 4. property and reference writes
//!
//! Every operation is applied to a working copy as it is emitted, so later
//! steps read positions from the tree the operation will actually see.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use arbor_tree::{NodeChange, NodeData, Tree};
use arbor_types::NodeId;

use crate::error::{OpError, OpResult};
use crate::intent::position_of;
use crate::operation::{NoVersions, Operation, Position};

/// Operations that turn `old` into `new`. Applying them to `old` yields a
/// tree with exactly the hash of `new`.
pub fn diff(old: &Tree, new: &Tree) -> OpResult<Vec<Operation>> {
    let changes = new.changes_since(old)?;
    if changes.is_empty() {
        return Ok(Vec::new());
    }

    let mut emitter = Emitter {
        tree: old.clone(),
        ops: Vec::new(),
    };

    let mut placed = Vec::new();
    let mut removed = BTreeSet::new();
    let mut updated: Vec<&NodeData> = Vec::new();
    for change in &changes {
        match change {
            NodeChange::Added(node) => {
                placed.push(node);
                updated.push(node);
            }
            NodeChange::Changed { old, new } => {
                if old.concept != new.concept {
                    return Err(OpError::Unrepresentable {
                        node: new.id,
                        reason: "concept changed".into(),
                    });
                }
                if old.parent != new.parent || old.role_in_parent != new.role_in_parent {
                    placed.push(new);
                }
                updated.push(new);
            }
            NodeChange::Removed(node) => {
                removed.insert(node.id);
            }
        }
    }

    // 1. placement
    let mut depths = BTreeMap::new();
    let mut ordered = Vec::with_capacity(placed.len());
    for node in placed {
        ordered.push((depth(new, node.id, &mut depths)?, node));
    }
    ordered.sort_by_key(|(d, n)| (*d, n.id));
    for (_, node) in ordered {
        let (Some(parent), Some(role)) = (node.parent, node.role_in_parent.as_deref()) else {
            return Err(OpError::Unrepresentable {
                node: node.id,
                reason: "node has no parent".into(),
            });
        };
        emitter.place(node, parent, role)?;
    }

    // 2. removal
    for change in &changes {
        if let NodeChange::Removed(node) = change {
            let parent_removed = node.parent.is_some_and(|p| removed.contains(&p));
            if !parent_removed && emitter.tree.contains(node.id)? {
                emitter.remove(node.id)?;
            }
        }
    }

    // 3. child order
    for node in &updated {
        for (role, target) in &node.children {
            emitter.reorder(node.id, role, target)?;
        }
    }

    // 4. properties and references
    for node in &updated {
        emitter.copy_values(node)?;
    }

    if emitter.tree.hash() != new.hash() {
        return Err(OpError::DiffMismatch {
            expected: new.hash(),
            actual: emitter.tree.hash(),
        });
    }
    debug!(
        from = %old.hash().short_hex(),
        to = %new.hash().short_hex(),
        nodes = changes.len(),
        ops = emitter.ops.len(),
        "derived operations from tree diff"
    );
    Ok(emitter.ops)
}

/// Distance from the root in `tree`, memoized.
fn depth(tree: &Tree, id: NodeId, memo: &mut BTreeMap<NodeId, usize>) -> OpResult<usize> {
    let mut chain = Vec::new();
    let mut current = id;
    let base = loop {
        if let Some(d) = memo.get(&current) {
            break *d;
        }
        let parent = tree.get(current)?.and_then(|n| n.parent);
        match parent {
            Some(p) if !chain.contains(&p) => {
                chain.push(current);
                current = p;
            }
            _ => {
                memo.insert(current, 0);
                break 0;
            }
        }
    };
    for (offset, node) in chain.iter().rev().enumerate() {
        memo.insert(*node, base + offset + 1);
    }
    Ok(memo.get(&id).copied().unwrap_or(0))
}

struct Emitter {
    tree: Tree,
    ops: Vec<Operation>,
}

impl Emitter {
    fn emit(&mut self, op: Operation) -> OpResult<()> {
        self.tree = op.apply(&self.tree, &NoVersions)?;
        self.ops.push(op);
        Ok(())
    }

    fn place(&mut self, node: &NodeData, parent: NodeId, role: &str) -> OpResult<()> {
        let source = position_of(&self.tree, node.id)?;
        let mut len = self.tree.children(parent, role)?.len();
        let op = match source {
            None if !self.tree.contains(node.id)? => Operation::AddChild {
                position: Position::new(parent, role, len),
                child: node.id,
                concept: node.concept.clone(),
            },
            None => {
                return Err(OpError::Unrepresentable {
                    node: node.id,
                    reason: "cannot attach a detached node".into(),
                })
            }
            Some(source) => {
                if source.parent == parent && source.role == role {
                    len -= 1;
                }
                Operation::Move {
                    node: node.id,
                    source,
                    target: Position::new(parent, role, len),
                }
            }
        };
        self.emit(op)
    }

    fn remove(&mut self, node: NodeId) -> OpResult<()> {
        let Some(position) = position_of(&self.tree, node)? else {
            return Err(OpError::Unrepresentable {
                node,
                reason: "cannot remove a detached node".into(),
            });
        };
        self.emit(Operation::Remove { node, position })
    }

    fn reorder(&mut self, parent: NodeId, role: &str, target: &[NodeId]) -> OpResult<()> {
        let mut current = self.tree.children(parent, role)?;
        for (index, child) in target.iter().enumerate() {
            if current.get(index) == Some(child) {
                continue;
            }
            self.emit(Operation::SetChildIndex {
                parent,
                role: role.to_string(),
                child: *child,
                index,
            })?;
            if let Some(from) = current.iter().position(|c| c == child) {
                let moved = current.remove(from);
                current.insert(index.min(current.len()), moved);
            }
        }
        Ok(())
    }

    fn copy_values(&mut self, target: &NodeData) -> OpResult<()> {
        let current = self.tree.require(target.id)?;
        let roles: BTreeSet<&String> = current
            .properties
            .keys()
            .chain(target.properties.keys())
            .collect();
        for role in roles {
            let value = target.properties.get(role);
            if current.properties.get(role) != value {
                self.emit(Operation::SetProperty {
                    node: target.id,
                    role: role.clone(),
                    value: value.cloned(),
                })?;
            }
        }
        let roles: BTreeSet<&String> = current
            .references
            .keys()
            .chain(target.references.keys())
            .collect();
        for role in roles {
            let reference = target.references.get(role);
            if current.references.get(role) != reference {
                self.emit(Operation::SetReference {
                    node: target.id,
                    role: role.clone(),
                    target: reference.cloned(),
                })?;
            }
        }
        Ok(())
    }
}
