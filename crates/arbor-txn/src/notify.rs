use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::warn;

use arbor_store::StoreKey;

use crate::error::TxResult;

/// Callback receiving a key and its newly committed value.
pub type Listener = Arc<dyn Fn(&StoreKey, Option<&[u8]>) + Send + Sync>;

/// Handle returned by [`TransactionalStore::listen`](crate::TransactionalStore::listen).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Watched {
    last: Option<Vec<u8>>,
    /// Bumped by every delivered value.
    generation: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Per-key listener registry that suppresses repeated values.
///
/// Deliveries are serialized: reading the value to publish and calling the
/// listeners happen under one delivery lock, so a value read later is never
/// delivered before a value read earlier. The lock is reentrant because a
/// listener may itself write to the store.
pub(crate) struct ChangeNotifier {
    next_id: AtomicU64,
    delivery: ReentrantMutex<()>,
    watched: Mutex<HashMap<StoreKey, Watched>>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            delivery: ReentrantMutex::new(()),
            watched: Mutex::new(HashMap::new()),
        }
    }

    /// Register `listener`, seeding the last seen value with `read(&key)`.
    pub(crate) fn add<F>(&self, key: StoreKey, listener: Listener, read: F) -> TxResult<ListenerId>
    where
        F: FnOnce(&StoreKey) -> TxResult<Option<Vec<u8>>>,
    {
        let _delivery = self.delivery.lock();
        let current = read(&key)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watched
            .lock()
            .entry(key)
            .or_insert_with(|| Watched {
                last: current,
                generation: 0,
                listeners: Vec::new(),
            })
            .listeners
            .push((id, listener));
        Ok(id)
    }

    /// Publish the value `read` returns for `key` if anyone listens to it.
    pub(crate) fn deliver<F>(&self, key: &StoreKey, read: F) -> TxResult<()>
    where
        F: FnOnce(&StoreKey) -> TxResult<Option<Vec<u8>>>,
    {
        let _delivery = self.delivery.lock();
        if !self.is_listened(key) {
            return Ok(());
        }
        let value = read(key)?;
        self.publish(key, value);
        Ok(())
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut watched = self.watched.lock();
        let Some(key) = watched
            .iter()
            .find(|(_, w)| w.listeners.iter().any(|(l, _)| *l == id))
            .map(|(k, _)| k.clone())
        else {
            return false;
        };
        if let Some(entry) = watched.get_mut(&key) {
            entry.listeners.retain(|(l, _)| *l != id);
            if entry.listeners.is_empty() {
                watched.remove(&key);
            }
        }
        true
    }

    fn is_listened(&self, key: &StoreKey) -> bool {
        self.watched.lock().contains_key(key)
    }

    fn generation(&self, key: &StoreKey) -> Option<u64> {
        self.watched.lock().get(key).map(|w| w.generation)
    }

    /// Deliver `value` to the listeners of `key` unless it equals the value
    /// they saw last. Listeners run without the registry lock held. When a
    /// listener causes a newer value to be delivered, the remaining
    /// listeners skip this one.
    fn publish(&self, key: &StoreKey, value: Option<Vec<u8>>) {
        let (generation, listeners): (u64, Vec<Listener>) = {
            let mut watched = self.watched.lock();
            let Some(entry) = watched.get_mut(key) else {
                return;
            };
            if entry.last == value {
                return;
            }
            entry.last = value.clone();
            entry.generation += 1;
            let listeners = entry.listeners.iter().map(|(_, l)| l.clone()).collect();
            (entry.generation, listeners)
        };
        for listener in listeners {
            if self.generation(key) != Some(generation) {
                break;
            }
            let call = catch_unwind(AssertUnwindSafe(|| listener(key, value.as_deref())));
            if call.is_err() {
                warn!(%key, "change listener panicked");
            }
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("keys", &self.watched.lock().len())
            .finish()
    }
}
