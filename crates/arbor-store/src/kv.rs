//! The key/value boundary underneath the object store.
//!
//! Physical storage (an embedded KV engine, a SQL table, a map in memory) is
//! a collaborator behind [`KeyValueStore`]. Keys are namespaced per
//! repository so that one repository's records are isolated from another's;
//! the [`Namespace::Global`] space holds the repository list and legacy
//! branch keys.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use arbor_types::{ObjectHash, RepositoryId};

use crate::error::StoreResult;
use crate::traits::ObjectStore;

/// Prefix of keys holding content-addressed records.
const OBJECT_PREFIX: &str = "hash-";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Global,
    Repository(RepositoryId),
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Repository(id) => write!(f, "repo:{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub namespace: Namespace,
    pub name: String,
}

impl StoreKey {
    /// A mutable entry such as a branch head or a list.
    pub fn entry(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// The key of a content-addressed record.
    pub fn object(namespace: Namespace, hash: &ObjectHash) -> Self {
        Self {
            namespace,
            name: format!("{OBJECT_PREFIX}{}", hash.to_hex()),
        }
    }

    /// `true` for content-addressed record keys.
    pub fn is_object(&self) -> bool {
        self.name.starts_with(OBJECT_PREFIX)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Raw key → bytes storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>>;

    /// Read many keys; absent keys are missing from the result.
    fn get_all(&self, keys: &[StoreKey]) -> StoreResult<HashMap<StoreKey, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Apply a batch atomically. `None` deletes the key.
    fn put_all(&self, entries: Vec<(StoreKey, Option<Vec<u8>>)>) -> StoreResult<()>;

    /// All keys of a namespace, sorted.
    fn keys_in(&self, namespace: &Namespace) -> StoreResult<Vec<StoreKey>>;

    /// Drop a whole namespace. Returns the number of removed keys.
    fn remove_namespace(&self, namespace: &Namespace) -> StoreResult<usize>;
}

/// `BTreeMap`-backed [`KeyValueStore`] for tests and embedding.
pub struct InMemoryKeyValueStore {
    entries: RwLock<BTreeMap<StoreKey, Vec<u8>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn get_all(&self, keys: &[StoreKey]) -> StoreResult<HashMap<StoreKey, Vec<u8>>> {
        let map = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn put_all(&self, entries: Vec<(StoreKey, Option<Vec<u8>>)>) -> StoreResult<()> {
        let mut map = self.entries.write();
        for (key, value) in entries {
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn keys_in(&self, namespace: &Namespace) -> StoreResult<Vec<StoreKey>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| &k.namespace == namespace)
            .cloned()
            .collect())
    }

    fn remove_namespace(&self, namespace: &Namespace) -> StoreResult<usize> {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|k, _| &k.namespace != namespace);
        Ok(before - map.len())
    }
}

impl fmt::Debug for InMemoryKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryKeyValueStore")
            .field("entries", &self.len())
            .finish()
    }
}

/// An [`ObjectStore`] over one namespace of a [`KeyValueStore`].
#[derive(Clone)]
pub struct KvObjectStore {
    kv: Arc<dyn KeyValueStore>,
    namespace: Namespace,
}

impl KvObjectStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self { kv, namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn key(&self, hash: &ObjectHash) -> StoreKey {
        StoreKey::object(self.namespace.clone(), hash)
    }
}

impl ObjectStore for KvObjectStore {
    fn get(&self, hash: &ObjectHash) -> StoreResult<Option<Vec<u8>>> {
        self.kv.get(&self.key(hash))
    }

    fn get_all(&self, hashes: &[ObjectHash]) -> StoreResult<HashMap<ObjectHash, Vec<u8>>> {
        let keys: Vec<StoreKey> = hashes.iter().map(|h| self.key(h)).collect();
        let mut found = self.kv.get_all(&keys)?;
        Ok(hashes
            .iter()
            .zip(keys.iter())
            .filter_map(|(h, k)| found.remove(k).map(|v| (*h, v)))
            .collect())
    }

    fn put(&self, hash: ObjectHash, bytes: Vec<u8>) -> StoreResult<()> {
        self.kv.put_all(vec![(self.key(&hash), Some(bytes))])
    }

    fn put_all(&self, entries: Vec<(ObjectHash, Vec<u8>)>) -> StoreResult<()> {
        let batch = entries
            .into_iter()
            .map(|(h, bytes)| (self.key(&h), Some(bytes)))
            .collect();
        self.kv.put_all(batch)
    }
}

impl fmt::Debug for KvObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvObjectStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectKind, StoredObject};

    fn repo(name: &str) -> Namespace {
        Namespace::Repository(RepositoryId::new(name).unwrap())
    }

    #[test]
    fn put_all_with_none_deletes() {
        let kv = InMemoryKeyValueStore::new();
        let key = StoreKey::entry(Namespace::Global, "repositories");
        kv.put_all(vec![(key.clone(), Some(b"v".to_vec()))]).unwrap();
        assert_eq!(kv.get(&key).unwrap(), Some(b"v".to_vec()));
        kv.put_all(vec![(key.clone(), None)]).unwrap();
        assert_eq!(kv.get(&key).unwrap(), None);
    }

    #[test]
    fn namespaces_are_isolated() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let a = KvObjectStore::new(Arc::clone(&kv), repo("a"));
        let b = KvObjectStore::new(Arc::clone(&kv), repo("b"));

        let obj = StoredObject::new(ObjectKind::TreeChunk, b"{}".to_vec());
        let hash = a.write(&obj).unwrap();
        assert!(a.get(&hash).unwrap().is_some());
        assert!(b.get(&hash).unwrap().is_none());
    }

    #[test]
    fn remove_namespace_only_touches_that_namespace() {
        let kv = InMemoryKeyValueStore::new();
        kv.put_all(vec![
            (StoreKey::entry(repo("a"), "x"), Some(vec![1])),
            (StoreKey::entry(repo("a"), "y"), Some(vec![2])),
            (StoreKey::entry(repo("b"), "x"), Some(vec![3])),
        ])
        .unwrap();
        assert_eq!(kv.remove_namespace(&repo("a")).unwrap(), 2);
        assert!(kv.keys_in(&repo("a")).unwrap().is_empty());
        assert_eq!(kv.keys_in(&repo("b")).unwrap().len(), 1);
    }

    #[test]
    fn object_keys_are_recognised() {
        let hash = ObjectHash::from_hash([3; 32]);
        let key = StoreKey::object(Namespace::Global, &hash);
        assert!(key.is_object());
        assert!(!StoreKey::entry(Namespace::Global, "branches").is_object());
        assert_eq!(key.to_string(), format!("global/hash-{}", hash.to_hex()));
    }

    #[test]
    fn kv_object_store_get_all_maps_back_to_hashes() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let store = KvObjectStore::new(kv, repo("r"));
        let h1 = store
            .write(&StoredObject::new(ObjectKind::TreeChunk, b"1".to_vec()))
            .unwrap();
        let missing = ObjectHash::from_hash([0; 32]);
        let found = store.get_all(&[h1, missing]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&h1));
    }
}
