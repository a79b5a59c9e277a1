//! A [`KeyValueStore`] view whose every call is its own transaction.
//!
//! Long-lived readers such as object stores need a `KeyValueStore` they can
//! hold on to. [`ScopedKeyValueStore`] gives them one without exposing the
//! raw store: reads run in a read scope, batches and namespace removal in a
//! write scope, and so are serialized with every other transaction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arbor_store::{KeyValueStore, Namespace, StoreError, StoreKey, StoreResult};

use crate::error::TxError;
use crate::store::TransactionalStore;

/// Transactional view of a [`TransactionalStore`].
///
/// Calls made on a thread that is inside a scope of the same store fail with
/// a backend error carrying [`TxError::IllegalTransactionState`]; inside a
/// scope use [`StoreTx`](crate::StoreTx).
#[derive(Clone)]
pub struct ScopedKeyValueStore {
    store: Arc<TransactionalStore>,
}

impl ScopedKeyValueStore {
    pub fn new(store: Arc<TransactionalStore>) -> Self {
        Self { store }
    }

    pub fn transactions(&self) -> &Arc<TransactionalStore> {
        &self.store
    }
}

fn store_error(err: TxError) -> StoreError {
    match err {
        TxError::Store(e) => e,
        other => StoreError::Backend(other.to_string()),
    }
}

impl KeyValueStore for ScopedKeyValueStore {
    fn get(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>> {
        self.store.run_read(|tx| tx.get(key)).map_err(store_error)
    }

    fn get_all(&self, keys: &[StoreKey]) -> StoreResult<HashMap<StoreKey, Vec<u8>>> {
        self.store.run_read(|tx| tx.get_all(keys)).map_err(store_error)
    }

    fn put_all(&self, entries: Vec<(StoreKey, Option<Vec<u8>>)>) -> StoreResult<()> {
        self.store
            .run_write(|tx| {
                for (key, value) in entries {
                    match value {
                        Some(value) => tx.put(key, value)?,
                        None => tx.remove(key)?,
                    }
                }
                Ok::<_, TxError>(())
            })
            .map_err(store_error)
    }

    fn keys_in(&self, namespace: &Namespace) -> StoreResult<Vec<StoreKey>> {
        self.store.run_read(|tx| tx.keys_in(namespace)).map_err(store_error)
    }

    fn remove_namespace(&self, namespace: &Namespace) -> StoreResult<usize> {
        self.store
            .run_write(|tx| tx.remove_namespace(namespace))
            .map_err(store_error)
    }
}

impl fmt::Debug for ScopedKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedKeyValueStore")
            .field("store", &self.store)
            .finish()
    }
}
