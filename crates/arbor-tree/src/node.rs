use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use arbor_types::{NodeId, NodeReference};

/// One node of a model.
///
/// Nodes are embedded in tree chunks, never stored on their own. Maps are
/// ordered and a role with no children has no entry, so equal nodes always
/// serialize to equal bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_in_parent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, NodeReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<NodeId>>,
}

impl NodeData {
    pub fn new(id: NodeId, concept: Option<String>) -> Self {
        Self {
            id,
            concept,
            parent: None,
            role_in_parent: None,
            properties: BTreeMap::new(),
            references: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// The root node of a fresh tree.
    pub fn root() -> Self {
        Self::new(NodeId::ROOT, None)
    }

    pub fn with_parent(mut self, parent: NodeId, role: impl Into<String>) -> Self {
        self.parent = Some(parent);
        self.role_in_parent = Some(role.into());
        self
    }

    /// Children in one role, in order.
    pub fn child_ids(&self, role: &str) -> &[NodeId] {
        self.children.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Children of all roles: roles in key order, each role in list order.
    pub fn all_child_ids(&self) -> Vec<NodeId> {
        self.children.values().flatten().copied().collect()
    }

    /// Role and index of `child`, if it is a child of this node.
    pub fn position_of(&self, child: NodeId) -> Option<(String, usize)> {
        self.children.iter().find_map(|(role, ids)| {
            ids.iter()
                .position(|id| *id == child)
                .map(|idx| (role.clone(), idx))
        })
    }

    /// Insert `child` at `index` of `role`. The caller checks the bound.
    pub fn insert_child(&mut self, role: &str, index: usize, child: NodeId) {
        let list = self.children.entry(role.to_string()).or_default();
        let index = index.min(list.len());
        list.insert(index, child);
    }

    /// Detach `child` from whichever role holds it.
    pub fn remove_child(&mut self, child: NodeId) -> Option<(String, usize)> {
        let (role, index) = self.position_of(child)?;
        if let Some(list) = self.children.get_mut(&role) {
            list.remove(index);
            if list.is_empty() {
                self.children.remove(&role);
            }
        }
        Some((role, index))
    }

    pub fn set_property(&mut self, role: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.properties.insert(role.to_string(), v);
            }
            None => {
                self.properties.remove(role);
            }
        }
    }

    pub fn set_reference(&mut self, role: &str, target: Option<NodeReference>) {
        match target {
            Some(t) => {
                self.references.insert(role.to_string(), t);
            }
            None => {
                self.references.remove(role);
            }
        }
    }
}
