//! Atomic key/value transactions.
//!
//! Writes made inside [`TransactionalStore::run_write`] are buffered and
//! applied to the key/value store in one `put_all` batch while the write
//! lock is still held. A scope that returns an error commits nothing, so
//! readers and listeners only ever see the value before the transaction or
//! the fully committed value after it.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use arbor_store::{KeyValueStore, Namespace, StoreKey};

use crate::error::{TxError, TxResult};
use crate::locks::{Transaction, TransactionLocks};
use crate::notify::{ChangeNotifier, ListenerId};

type Pending = BTreeMap<StoreKey, Option<Vec<u8>>>;

pub struct TransactionalStore {
    kv: Arc<dyn KeyValueStore>,
    locks: TransactionLocks,
    notifier: ChangeNotifier,
}

impl TransactionalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            locks: TransactionLocks::new(),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn locks(&self) -> &TransactionLocks {
        &self.locks
    }

    /// Run `f` with read access.
    ///
    /// Fails with [`TxError::IllegalTransactionState`] on a thread that is
    /// already inside a write scope of this store; nested scopes are opened
    /// through [`StoreTx`].
    pub fn run_read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
    {
        let pending = RefCell::new(Pending::new());
        self.locks.run_read(|lock| {
            f(&StoreTx {
                store: self,
                lock,
                pending: &pending,
            })
        })
    }

    /// Run `f` with write access. On `Ok` every buffered write is committed
    /// as one batch and listeners of the changed keys are notified after the
    /// lock is released.
    pub fn run_write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
    {
        let pending = RefCell::new(Pending::new());
        let (value, changed) = self.locks.run_write(|lock| {
            let value = f(&StoreTx {
                store: self,
                lock,
                pending: &pending,
            })?;
            let batch: Vec<_> = pending.take().into_iter().collect();
            let changed: Vec<StoreKey> = batch.iter().map(|(k, _)| k.clone()).collect();
            if !batch.is_empty() {
                debug!(keys = batch.len(), "committing write transaction");
                self.kv
                    .put_all(batch)
                    .map_err(|e| E::from(TxError::from(e)))?;
            }
            Ok::<_, E>((value, changed))
        })?;
        self.notify(&changed);
        Ok(value)
    }

    /// Call `listener` with the committed value of `key` whenever it changes.
    pub fn listen<F>(&self, key: StoreKey, listener: F) -> TxResult<ListenerId>
    where
        F: Fn(&StoreKey, Option<&[u8]>) + Send + Sync + 'static,
    {
        if key.is_object() {
            return Err(TxError::ObjectKeyNotListenable(key));
        }
        self.notifier
            .add(key, Arc::new(listener), |key| self.run_read(|tx| tx.get(key)))
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.notifier.remove(id)
    }

    /// Must run without any transaction scope of this store held: the
    /// re-read waits for concurrent writers.
    fn notify(&self, changed: &[StoreKey]) {
        for key in changed.iter().filter(|k| !k.is_object()) {
            let delivered = self
                .notifier
                .deliver(key, |key| self.run_read(|tx| tx.get(key)));
            if let Err(e) = delivered {
                warn!(%key, error = %e, "failed to re-read changed key");
            }
        }
    }
}

impl fmt::Debug for TransactionalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalStore")
            .field("locks", &self.locks)
            .field("notifier", &self.notifier)
            .finish()
    }
}

/// Store access inside a transaction scope.
///
/// A `StoreTx` cannot outlive the scope it was handed to, so the store is
/// never reached outside a transaction:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use arbor_store::InMemoryKeyValueStore;
/// use arbor_txn::{TransactionalStore, TxError};
///
/// let store = TransactionalStore::new(Arc::new(InMemoryKeyValueStore::new()));
/// let escaped = store.run_read(|tx| Ok::<_, TxError>(tx));
/// ```
pub struct StoreTx<'a> {
    store: &'a TransactionalStore,
    lock: &'a Transaction<'a>,
    pending: &'a RefCell<Pending>,
}

impl<'a> StoreTx<'a> {
    pub fn transaction(&self) -> &Transaction<'a> {
        self.lock
    }

    pub fn can_write(&self) -> bool {
        self.lock.can_write()
    }

    /// Reads see this transaction's own uncommitted writes.
    pub fn get(&self, key: &StoreKey) -> TxResult<Option<Vec<u8>>> {
        if let Some(value) = self.pending.borrow().get(key) {
            return Ok(value.clone());
        }
        Ok(self.store.kv.get(key)?)
    }

    pub fn get_all(&self, keys: &[StoreKey]) -> TxResult<HashMap<StoreKey, Vec<u8>>> {
        let pending = self.pending.borrow();
        let (buffered, rest): (Vec<_>, Vec<_>) =
            keys.iter().cloned().partition(|k| pending.contains_key(k));
        let mut found = self.store.kv.get_all(&rest)?;
        for key in buffered {
            if let Some(Some(value)) = pending.get(&key) {
                found.insert(key, value.clone());
            }
        }
        Ok(found)
    }

    pub fn put(&self, key: StoreKey, value: Vec<u8>) -> TxResult<()> {
        self.lock.require_write()?;
        self.pending.borrow_mut().insert(key, Some(value));
        Ok(())
    }

    pub fn remove(&self, key: StoreKey) -> TxResult<()> {
        self.lock.require_write()?;
        self.pending.borrow_mut().insert(key, None);
        Ok(())
    }

    /// Keys of `namespace` as this transaction sees them, sorted.
    pub fn keys_in(&self, namespace: &Namespace) -> TxResult<Vec<StoreKey>> {
        let mut keys: BTreeSet<StoreKey> = self.store.kv.keys_in(namespace)?.into_iter().collect();
        for (key, value) in self.pending.borrow().iter() {
            if &key.namespace != namespace {
                continue;
            }
            if value.is_some() {
                keys.insert(key.clone());
            } else {
                keys.remove(key);
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Delete every key of `namespace`. Returns the number of deleted keys.
    pub fn remove_namespace(&self, namespace: &Namespace) -> TxResult<usize> {
        self.lock.require_write()?;
        let keys = self.keys_in(namespace)?;
        let count = keys.len();
        let mut pending = self.pending.borrow_mut();
        for key in keys {
            pending.insert(key, None);
        }
        Ok(count)
    }

    /// Nested read scope; writes are rejected until it returns.
    pub fn run_read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
    {
        self.lock.run_read(|lock| {
            f(&StoreTx {
                store: self.store,
                lock,
                pending: self.pending,
            })
        })
    }

    /// Nested write scope. Its writes are discarded if it fails, even when
    /// the enclosing scope goes on to commit.
    pub fn run_write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
    {
        let snapshot = self.pending.borrow().clone();
        let result = self.lock.run_write(|lock| {
            f(&StoreTx {
                store: self.store,
                lock,
                pending: self.pending,
            })
        });
        if result.is_err() {
            *self.pending.borrow_mut() = snapshot;
        }
        result
    }
}

impl fmt::Debug for StoreTx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTx")
            .field("transaction", self.lock)
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::InMemoryKeyValueStore;
    use arbor_types::{ObjectHash, RepositoryId};
    use parking_lot::Mutex;
    use std::thread;

    fn store() -> TransactionalStore {
        TransactionalStore::new(Arc::new(InMemoryKeyValueStore::new()))
    }

    fn key(name: &str) -> StoreKey {
        StoreKey::entry(Namespace::Global, name)
    }

    fn read(store: &TransactionalStore, name: &str) -> Option<Vec<u8>> {
        store.run_read(|tx| tx.get(&key(name))).unwrap()
    }

    // ---- atomicity ----

    #[test]
    fn writes_become_visible_together() {
        let store = store();
        store
            .run_write(|tx| {
                tx.put(key("a"), b"1".to_vec())?;
                tx.put(key("b"), b"2".to_vec())?;
                assert_eq!(tx.get(&key("a"))?, Some(b"1".to_vec()));
                // Not committed yet.
                assert_eq!(store.kv.get(&key("a"))?, None);
                Ok::<_, TxError>(())
            })
            .unwrap();
        assert_eq!(read(&store, "a"), Some(b"1".to_vec()));
        assert_eq!(read(&store, "b"), Some(b"2".to_vec()));
    }

    #[test]
    fn failed_write_leaves_prior_value() {
        let store = store();
        store
            .run_write(|tx| tx.put(key("a"), b"old".to_vec()))
            .unwrap();
        let result: TxResult<()> = store.run_write(|tx| {
            tx.put(key("a"), b"new".to_vec())?;
            tx.put(key("b"), b"new".to_vec())?;
            Err(TxError::IllegalTransactionState("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(read(&store, "a"), Some(b"old".to_vec()));
        assert_eq!(read(&store, "b"), None);
    }

    #[test]
    fn failed_nested_write_is_discarded() {
        let store = store();
        store
            .run_write(|tx| {
                tx.put(key("kept"), b"1".to_vec())?;
                let nested: TxResult<()> = tx.run_write(|inner| {
                    inner.put(key("dropped"), b"2".to_vec())?;
                    Err(TxError::IllegalTransactionState("abort".into()))
                });
                assert!(nested.is_err());
                Ok::<_, TxError>(())
            })
            .unwrap();
        assert_eq!(read(&store, "kept"), Some(b"1".to_vec()));
        assert_eq!(read(&store, "dropped"), None);
    }

    #[test]
    fn writes_inside_reads_fail() {
        let store = store();
        let result = store.run_read(|tx| tx.put(key("a"), b"1".to_vec()));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
        let result = store.run_write(|tx| tx.run_read(|inner| inner.remove(key("a"))));
        assert!(matches!(result, Err(TxError::IllegalTransactionState(_))));
    }

    #[test]
    fn namespaces_are_listed_and_removed_transactionally() {
        let store = store();
        let ns = Namespace::Repository(RepositoryId::new("repo").unwrap());
        store
            .run_write(|tx| {
                tx.put(StoreKey::entry(ns.clone(), "branches"), vec![1])?;
                tx.put(StoreKey::entry(ns.clone(), "head"), vec![2])?;
                tx.put(key("repositories"), vec![3])?;
                assert_eq!(tx.keys_in(&ns)?.len(), 2);
                Ok::<_, TxError>(())
            })
            .unwrap();
        let removed = store
            .run_write(|tx| {
                let n = tx.remove_namespace(&ns)?;
                assert!(tx.keys_in(&ns)?.is_empty());
                Ok::<_, TxError>(n)
            })
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.kv.keys_in(&ns).unwrap().is_empty());
        assert_eq!(read(&store, "repositories"), Some(vec![3]));
    }

    // ---- notification ----

    #[test]
    fn listeners_see_committed_values_once() {
        let store = Arc::new(store());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = seen.clone();
        let reader = store.clone();
        store
            .listen(key("head"), move |k, value| {
                // Reading from inside the callback sees the committed value.
                let stored = reader.run_read(|tx| tx.get(k)).unwrap();
                assert_eq!(stored.as_deref(), value);
                observed.lock().push(value.map(<[u8]>::to_vec));
            })
            .unwrap();

        store.run_write(|tx| tx.put(key("head"), vec![1])).unwrap();
        // Same value again: no notification.
        store.run_write(|tx| tx.put(key("head"), vec![1])).unwrap();
        // Failed transaction: no notification.
        let _: TxResult<()> = store.run_write(|tx| {
            tx.put(key("head"), vec![9])?;
            Err(TxError::IllegalTransactionState("abort".into()))
        });
        store.run_write(|tx| tx.remove(key("head"))).unwrap();

        assert_eq!(*seen.lock(), vec![Some(vec![1]), None]);
    }

    #[test]
    fn object_keys_cannot_be_listened_to() {
        let store = store();
        let hash = ObjectHash::from_hash([7; 32]);
        let result = store.listen(StoreKey::object(Namespace::Global, &hash), |_, _| {});
        assert!(matches!(result, Err(TxError::ObjectKeyNotListenable(_))));
    }

    #[test]
    fn panicking_listener_does_not_poison_the_store() {
        let store = store();
        let calls = Arc::new(Mutex::new(0));
        store
            .listen(key("k"), |_, _| panic!("listener failure"))
            .unwrap();
        let counter = calls.clone();
        store
            .listen(key("k"), move |_, _| *counter.lock() += 1)
            .unwrap();
        store.run_write(|tx| tx.put(key("k"), vec![1])).unwrap();
        store.run_write(|tx| tx.put(key("k"), vec![2])).unwrap();
        assert_eq!(*calls.lock(), 2);
        assert_eq!(read(&store, "k"), Some(vec![2]));
    }

    #[test]
    fn unlisten_stops_notifications() {
        let store = store();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let id = store
            .listen(key("k"), move |_, _| *counter.lock() += 1)
            .unwrap();
        store.run_write(|tx| tx.put(key("k"), vec![1])).unwrap();
        assert!(store.unlisten(id));
        assert!(!store.unlisten(id));
        store.run_write(|tx| tx.put(key("k"), vec![2])).unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    // ---- concurrency ----

    fn increment(store: &TransactionalStore, name: &str) -> u64 {
        store
            .run_write(|tx| {
                let n = tx.get(&key(name))?.map_or(0, |b| decode_u64(&b)) + 1;
                tx.put(key(name), n.to_le_bytes().to_vec())?;
                Ok::<_, TxError>(n)
            })
            .unwrap()
    }

    fn decode_u64(bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(buf)
    }

    #[test]
    fn concurrent_commits_are_delivered_in_order() {
        for _ in 0..50 {
            let store = Arc::new(store());
            let delivered = Arc::new(Mutex::new(Vec::new()));
            let sink = delivered.clone();
            store
                .listen(key("n"), move |_, value| {
                    sink.lock().push(value.map_or(0, decode_u64));
                })
                .unwrap();

            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let store = store.clone();
                    thread::spawn(move || {
                        for _ in 0..20 {
                            increment(&store, "n");
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let delivered = delivered.lock();
            assert!(
                delivered.windows(2).all(|w| w[0] < w[1]),
                "out of order: {delivered:?}"
            );
            assert_eq!(delivered.last(), Some(&120));
        }
    }

    #[test]
    fn listener_writing_to_the_store_does_not_deadlock() {
        let store = Arc::new(store());
        let writer = store.clone();
        store
            .listen(key("trigger"), move |_, value| {
                if value.is_some() {
                    increment(&writer, "echo");
                }
            })
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .listen(key("echo"), move |_, value| {
                sink.lock().push(value.map_or(0, decode_u64));
            })
            .unwrap();

        for n in 1..=3u8 {
            store.run_write(|tx| tx.put(key("trigger"), vec![n])).unwrap();
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .run_write(|tx| {
                                let n = tx
                                    .get(&key("n"))?
                                    .map_or(0u32, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                                tx.put(key("n"), (n + 1).to_le_bytes().to_vec())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(read(&store, "n"), Some(100u32.to_le_bytes().to_vec()));
    }
}
