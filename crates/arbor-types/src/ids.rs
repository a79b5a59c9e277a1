use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of a node within a model.
///
/// Ids are allocated by an [`IdGenerator`] as `client_id << 32 | counter`,
/// which keeps them unique across concurrently writing clients without
/// coordination. The value `1` is reserved for the root node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// The root node present in every tree.
    pub const ROOT: NodeId = NodeId(1);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Identifier of a version. Doubles as the merge tie-break key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({:x})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Target of a reference role: a node of the same model or an opaque
/// serialized reference into some other model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeReference {
    Local(NodeId),
    Foreign(String),
}

impl fmt::Display for NodeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::Foreign(serialized) => write!(f, "foreign:{serialized}"),
        }
    }
}

/// Allocates node and version ids for one client.
pub struct IdGenerator {
    client_id: u32,
    counter: AtomicU64,
}

impl IdGenerator {
    /// Create a generator for a client. Client id `0` is rejected because it
    /// would collide with [`NodeId::ROOT`].
    pub fn new(client_id: u32) -> Result<Self, TypeError> {
        if client_id == 0 {
            return Err(TypeError::InvalidClientId(client_id));
        }
        Ok(Self {
            client_id,
            counter: AtomicU64::new(0),
        })
    }

    /// Create a generator with a randomly chosen client id.
    pub fn random() -> Self {
        let client_id = rand::thread_rng().gen_range(1..=u32::MAX);
        Self {
            client_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    fn next_raw(&self) -> Result<u64, TypeError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n > u64::from(u32::MAX) {
            return Err(TypeError::IdSpaceExhausted(self.client_id));
        }
        Ok((u64::from(self.client_id) << 32) | n)
    }

    pub fn next_node_id(&self) -> Result<NodeId, TypeError> {
        self.next_raw().map(NodeId)
    }

    pub fn next_version_id(&self) -> Result<VersionId, TypeError> {
        self.next_raw().map(VersionId)
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("client_id", &self.client_id)
            .field("issued", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}
