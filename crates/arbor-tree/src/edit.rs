//! Model-level edits.
//!
//! Unlike the raw [`Tree::set`]/[`Tree::remove`], these keep parent and
//! child links consistent: a node listed as a child always exists and its
//! `parent`/`role_in_parent` point back at the list holding it.

use arbor_types::{NodeId, NodeReference};

use crate::error::{TreeError, TreeResult};
use crate::node::NodeData;
use crate::tree::Tree;

impl Tree {
    /// Create `child` under `parent` at `index` of `role`.
    pub fn add_new_child(
        &self,
        parent: NodeId,
        role: &str,
        index: usize,
        child: NodeId,
        concept: Option<String>,
    ) -> TreeResult<Tree> {
        if self.contains(child)? {
            return Err(TreeError::NodeExists(child));
        }
        let mut parent_node = self.require(parent)?;
        let len = parent_node.child_ids(role).len();
        if index > len {
            return Err(TreeError::IndexOutOfRange {
                parent,
                role: role.to_string(),
                index,
                len,
            });
        }
        parent_node.insert_child(role, index, child);
        let child_node = NodeData::new(child, concept).with_parent(parent, role);
        self.set_all([parent_node, child_node])
    }

    /// Remove `node` and everything below it.
    pub fn delete_subtree(&self, node: NodeId) -> TreeResult<Tree> {
        if node.is_root() {
            return Err(TreeError::RootImmutable);
        }
        let target = self.require(node)?;
        let doomed = self
            .descendants(node, true)
            .iter()
            .map(|n| n.map(|n| n.id))
            .collect::<TreeResult<Vec<_>>>()?;
        let mut tree = self.remove_all(doomed)?;
        if let Some(parent) = target.parent {
            if let Some(mut parent_node) = tree.get(parent)? {
                parent_node.remove_child(node);
                tree = tree.set(parent_node)?;
            }
        }
        Ok(tree)
    }

    /// Move `node` to `index` of `role` under `target`. The index is
    /// interpreted after `node` has been detached from its old position.
    pub fn move_child(&self, node: NodeId, target: NodeId, role: &str, index: usize) -> TreeResult<Tree> {
        if node.is_root() {
            return Err(TreeError::RootImmutable);
        }
        let mut moved = self.require(node)?;
        self.require(target)?;
        if target == node || self.ancestors(target)?.contains(&node) {
            return Err(TreeError::CycleDetected { node, target });
        }

        let mut tree = self.clone();
        if let Some(old_parent) = moved.parent {
            if let Some(mut old) = tree.get(old_parent)? {
                old.remove_child(node);
                tree = tree.set(old)?;
            }
        }
        let mut new_parent = tree.require(target)?;
        let len = new_parent.child_ids(role).len();
        if index > len {
            return Err(TreeError::IndexOutOfRange {
                parent: target,
                role: role.to_string(),
                index,
                len,
            });
        }
        new_parent.insert_child(role, index, node);
        moved.parent = Some(target);
        moved.role_in_parent = Some(role.to_string());
        tree.set_all([new_parent, moved])
    }

    pub fn set_property(&self, node: NodeId, role: &str, value: Option<String>) -> TreeResult<Tree> {
        self.update(node, |n| n.set_property(role, value))
    }

    pub fn set_reference(
        &self,
        node: NodeId,
        role: &str,
        target: Option<NodeReference>,
    ) -> TreeResult<Tree> {
        self.update(node, |n| n.set_reference(role, target))
    }

    /// Reorder `child` within its current role list.
    pub fn set_child_index(&self, parent: NodeId, role: &str, child: NodeId, index: usize) -> TreeResult<Tree> {
        let mut parent_node = self.require(parent)?;
        let list = parent_node.child_ids(role);
        let Some(current) = list.iter().position(|c| *c == child) else {
            return Err(TreeError::ChildNotInRole {
                parent,
                role: role.to_string(),
                child,
            });
        };
        if index >= list.len() {
            return Err(TreeError::IndexOutOfRange {
                parent,
                role: role.to_string(),
                index,
                len: list.len(),
            });
        }
        if current == index {
            return Ok(self.clone());
        }
        if let Some(list) = parent_node.children.get_mut(role) {
            let moved = list.remove(current);
            list.insert(index, moved);
        }
        self.set(parent_node)
    }
}
