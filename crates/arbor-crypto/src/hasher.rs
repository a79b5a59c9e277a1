use arbor_types::ObjectHash;
use sha2::{Digest, Sha256};

/// SHA-256 content hasher.
///
/// `hash(bytes)` is the store key of `bytes`. Multi-part input is hashed as
/// the concatenation of its parts, which lets callers hash a tag byte and a
/// serialized body without first copying them into one buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Hash raw bytes.
    pub fn hash(data: &[u8]) -> ObjectHash {
        ObjectHash::from_hash(Sha256::digest(data).into())
    }

    /// Hash the concatenation of `parts`.
    pub fn hash_parts(parts: &[&[u8]]) -> ObjectHash {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        ObjectHash::from_hash(hasher.finalize().into())
    }

    /// Hash a serializable value as JSON.
    pub fn hash_json<T: serde::Serialize>(value: &T) -> Result<ObjectHash, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(Self::hash(&data))
    }

    /// Verify that data produces the expected hash.
    pub fn verify(data: &[u8], expected: &ObjectHash) -> bool {
        Self::hash(data) == *expected
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
