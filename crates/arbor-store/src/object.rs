use serde::de::DeserializeOwned;
use serde::Serialize;

use arbor_crypto::ContentHasher;
use arbor_types::ObjectHash;

use crate::error::{StoreError, StoreResult};

/// The kind of record stored under a hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// One chunk of a persistent hash tree.
    TreeChunk,
    /// A version (commit) record.
    Version,
    /// Operations of a version stored out of line.
    OperationList,
}

impl ObjectKind {
    /// Leading byte of the stored representation.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::TreeChunk => 1,
            Self::Version => 2,
            Self::OperationList => 3,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::TreeChunk),
            2 => Some(Self::Version),
            3 => Some(Self::OperationList),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TreeChunk => write!(f, "tree-chunk"),
            Self::Version => write!(f, "version"),
            Self::OperationList => write!(f, "operation-list"),
        }
    }
}

/// A hash held inside a record, together with the kind of record it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub hash: ObjectHash,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, hash: ObjectHash) -> Self {
        Self { kind, hash }
    }
}

/// A typed record that can live in the object store.
///
/// The set of hashes a record references must be derivable from the record
/// alone; delta computation and reachability walks rely on it.
pub trait ObjectData: Serialize + DeserializeOwned {
    const KIND: ObjectKind;

    /// Every hash this record points at.
    fn references(&self) -> Vec<ObjectRef>;
}

/// A stored object: kind tag + serialized body.
///
/// The stored bytes are `[kind tag] ++ body`, and the object's hash is the
/// SHA-256 of exactly those bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub body: Vec<u8>,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// Serialize a typed record.
    pub fn encode<T: ObjectData>(record: &T) -> StoreResult<Self> {
        let body =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::new(T::KIND, body))
    }

    /// Decode into a typed record, checking the kind tag.
    pub fn decode<T: ObjectData>(&self) -> StoreResult<T> {
        if self.kind != T::KIND {
            return Err(StoreError::CorruptObject {
                hash: self.compute_hash(),
                reason: format!("expected {}, got {}", T::KIND, self.kind),
            });
        }
        serde_json::from_slice(&self.body).map_err(|e| StoreError::CorruptObject {
            hash: self.compute_hash(),
            reason: e.to_string(),
        })
    }

    /// Content hash of the stored representation.
    pub fn compute_hash(&self) -> ObjectHash {
        ContentHasher::hash_parts(&[&[self.kind.tag()], &self.body])
    }

    /// The bytes written to the store.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.body.len() + 1);
        bytes.push(self.kind.tag());
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Parse stored bytes, verifying that they hash to `hash`.
    pub fn from_bytes(hash: &ObjectHash, bytes: &[u8]) -> StoreResult<Self> {
        let computed = ContentHasher::hash(bytes);
        if computed != *hash {
            return Err(StoreError::HashMismatch {
                hash: *hash,
                computed,
            });
        }
        let (&tag, body) = bytes.split_first().ok_or_else(|| StoreError::CorruptObject {
            hash: *hash,
            reason: "empty record".into(),
        })?;
        let kind = ObjectKind::from_tag(tag).ok_or_else(|| StoreError::CorruptObject {
            hash: *hash,
            reason: format!("unknown kind tag {tag}"),
        })?;
        Ok(Self::new(kind, body.to_vec()))
    }
}
