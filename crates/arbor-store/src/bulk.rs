//! The bulk query executor.
//!
//! Traversing a lazily loaded tree produces a stream of small "fetch this
//! hash" requests, and resolving one record usually reveals more hashes to
//! fetch. [`BulkQuery`] collects those requests and turns them into a few
//! batched [`ObjectStore::get_all`] calls.
//!
//! Each [`flush`](BulkQuery::flush) step takes the *most recently enqueued*
//! batch-sized slice of the pending requests (never the oldest). Since the
//! callbacks of one batch enqueue the next level of the traversal, this
//! drives a depth-first walk whose queue stays proportional to depth times
//! fan-out instead of growing with the size of the tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use arbor_types::ObjectHash;

use crate::error::StoreResult;
use crate::traits::ObjectStore;

/// A class of requests sharing one batch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestType {
    pub name: &'static str,
    pub batch_size: usize,
}

impl RequestType {
    pub const fn new(name: &'static str, batch_size: usize) -> Self {
        Self { name, batch_size }
    }
}

/// Callback invoked with the fetched bytes (`None` if the hash is unknown).
///
/// The query is handed back so the callback can enqueue follow-up requests.
pub type Callback<'s> = Box<dyn FnOnce(&mut BulkQuery<'s>, StoreResult<Option<&[u8]>>) + 's>;

type Continuation<'s> = Box<dyn FnOnce(&mut BulkQuery<'s>) + 's>;

/// Counters describing how a query was executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Batched store round trips.
    pub store_calls: u64,
    /// Calls to `request`.
    pub requests: u64,
    /// Requests folded into an already pending request for the same hash.
    pub deduplicated: u64,
    /// Largest number of distinct pending hashes observed.
    pub peak_pending: usize,
}

struct PendingRequest<'s> {
    seq: u64,
    callbacks: Vec<Callback<'s>>,
}

struct RequestQueue<'s> {
    request_type: RequestType,
    /// Pending hashes in enqueue order.
    order: Vec<ObjectHash>,
    pending: HashMap<ObjectHash, PendingRequest<'s>>,
}

impl RequestQueue<'_> {
    fn newest_seq(&self) -> Option<u64> {
        self.order
            .last()
            .and_then(|h| self.pending.get(h))
            .map(|r| r.seq)
    }
}

/// Coalesces single-hash reads into batched store calls.
pub struct BulkQuery<'s> {
    store: &'s dyn ObjectStore,
    queues: Vec<RequestQueue<'s>>,
    ready: Vec<Continuation<'s>>,
    next_seq: u64,
    stats: BulkStats,
}

impl<'s> BulkQuery<'s> {
    pub fn new(store: &'s dyn ObjectStore) -> Self {
        Self {
            store,
            queues: Vec::new(),
            ready: Vec::new(),
            next_seq: 0,
            stats: BulkStats::default(),
        }
    }

    /// Enqueue a read of `hash`.
    ///
    /// Several requests for the same pending hash share one fetch; their
    /// callbacks run in request order.
    pub fn request<F>(&mut self, request_type: RequestType, hash: ObjectHash, callback: F)
    where
        F: FnOnce(&mut BulkQuery<'s>, StoreResult<Option<&[u8]>>) + 's,
    {
        self.stats.requests += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let idx = match self
            .queues
            .iter()
            .position(|q| q.request_type.name == request_type.name)
        {
            Some(idx) => idx,
            None => {
                self.queues.push(RequestQueue {
                    request_type,
                    order: Vec::new(),
                    pending: HashMap::new(),
                });
                self.queues.len() - 1
            }
        };
        let queue = &mut self.queues[idx];
        match queue.pending.get_mut(&hash) {
            Some(existing) => {
                existing.callbacks.push(Box::new(callback));
                self.stats.deduplicated += 1;
            }
            None => {
                queue.order.push(hash);
                queue.pending.insert(
                    hash,
                    PendingRequest {
                        seq,
                        callbacks: vec![Box::new(callback)],
                    },
                );
            }
        }
        let pending = self.pending_hashes();
        self.stats.peak_pending = self.stats.peak_pending.max(pending);
    }

    /// Run `f` on the next step without a store round trip.
    ///
    /// Used for values already resolved from a cache, so that deep chains of
    /// cache hits are driven by the flush loop rather than by recursion.
    pub fn defer<F>(&mut self, f: F)
    where
        F: FnOnce(&mut BulkQuery<'s>) + 's,
    {
        self.ready.push(Box::new(f));
    }

    /// Distinct hashes waiting to be fetched.
    pub fn pending_hashes(&self) -> usize {
        self.queues.iter().map(|q| q.order.len()).sum()
    }

    /// `true` when nothing is queued or deferred.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.pending_hashes() == 0
    }

    pub fn stats(&self) -> BulkStats {
        self.stats
    }

    /// Execute one unit of work: a deferred continuation if any, otherwise
    /// one batch. Returns `false` if there was nothing to do.
    pub fn step(&mut self) -> bool {
        if let Some(continuation) = self.ready.pop() {
            continuation(self);
            return true;
        }

        let Some(idx) = self
            .queues
            .iter()
            .enumerate()
            .filter_map(|(i, q)| q.newest_seq().map(|seq| (seq, i)))
            .max()
            .map(|(_, i)| i)
        else {
            return false;
        };

        let queue = &mut self.queues[idx];
        let request_type = queue.request_type;
        let take = request_type.batch_size.max(1).min(queue.order.len());
        let batch = queue.order.split_off(queue.order.len() - take);
        let requests: Vec<(ObjectHash, PendingRequest<'s>)> = batch
            .iter()
            .filter_map(|h| queue.pending.remove(h).map(|r| (*h, r)))
            .collect();

        trace!(
            request_type = request_type.name,
            batch = batch.len(),
            remaining = queue.order.len(),
            "executing bulk batch"
        );
        self.stats.store_calls += 1;
        match self.store.get_all(&batch) {
            Ok(found) => {
                for (hash, request) in requests {
                    let bytes = found.get(&hash).map(Vec::as_slice);
                    for callback in request.callbacks {
                        callback(self, Ok(bytes));
                    }
                }
            }
            Err(err) => {
                for (_, request) in requests {
                    for callback in request.callbacks {
                        callback(self, Err(err.clone()));
                    }
                }
            }
        }
        true
    }

    /// Drain all pending work, including requests enqueued by callbacks.
    pub fn flush(&mut self) {
        while self.step() {}
    }
}

impl std::fmt::Debug for BulkQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkQuery")
            .field("pending", &self.pending_hashes())
            .field("ready", &self.ready.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Fetch a single hash through a one-off query.
pub fn fetch_one(
    store: &dyn ObjectStore,
    request_type: RequestType,
    hash: ObjectHash,
) -> StoreResult<Option<Vec<u8>>> {
    let slot: Rc<RefCell<StoreResult<Option<Vec<u8>>>>> = Rc::new(RefCell::new(Ok(None)));
    let mut query = BulkQuery::new(store);
    let out = Rc::clone(&slot);
    query.request(request_type, hash, move |_, result| {
        *out.borrow_mut() = result.map(|bytes| bytes.map(<[u8]>::to_vec));
    });
    query.flush();
    drop(query);
    Rc::try_unwrap(slot)
        .map(RefCell::into_inner)
        .unwrap_or_else(|shared| shared.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::InMemoryObjectStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    const NODES: RequestType = RequestType::new("nodes", 16);

    /// A store that synthesizes a complete tree: the hash encodes
    /// `(level, index)` and every hash below `depth` exists.
    struct SyntheticTree {
        depth: u64,
        calls: AtomicU64,
    }

    fn node_hash(level: u64, index: u64) -> ObjectHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&level.to_be_bytes());
        bytes[8..16].copy_from_slice(&index.to_be_bytes());
        ObjectHash::from_hash(bytes)
    }

    fn decode(hash: &ObjectHash) -> (u64, u64) {
        let b = hash.as_bytes();
        let mut level = [0u8; 8];
        let mut index = [0u8; 8];
        level.copy_from_slice(&b[..8]);
        index.copy_from_slice(&b[8..16]);
        (u64::from_be_bytes(level), u64::from_be_bytes(index))
    }

    impl ObjectStore for SyntheticTree {
        fn get(&self, hash: &ObjectHash) -> StoreResult<Option<Vec<u8>>> {
            Ok(self.get_all(&[*hash])?.remove(hash))
        }

        fn get_all(&self, hashes: &[ObjectHash]) -> StoreResult<HashMap<ObjectHash, Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(hashes
                .iter()
                .filter(|h| decode(h).0 < self.depth)
                .map(|h| (*h, h.as_bytes().to_vec()))
                .collect())
        }

        fn put(&self, _hash: ObjectHash, _bytes: Vec<u8>) -> StoreResult<()> {
            Ok(())
        }
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn get(&self, _hash: &ObjectHash) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::Backend("offline".into()))
        }

        fn get_all(&self, _: &[ObjectHash]) -> StoreResult<HashMap<ObjectHash, Vec<u8>>> {
            Err(StoreError::Backend("offline".into()))
        }

        fn put(&self, _hash: ObjectHash, _bytes: Vec<u8>) -> StoreResult<()> {
            Ok(())
        }
    }

    fn visit(query: &mut BulkQuery<'_>, hash: ObjectHash, fanout: u64, seen: Rc<RefCell<u64>>) {
        query.request(NODES, hash, move |q, result| {
            if result.unwrap().is_none() {
                return;
            }
            *seen.borrow_mut() += 1;
            let (level, index) = decode(&hash);
            for k in 0..fanout {
                visit(q, node_hash(level + 1, index * fanout + k), fanout, Rc::clone(&seen));
            }
        });
    }

    // ---- traversal bounds ----

    #[test]
    fn depth_first_traversal_bounds_queue_and_store_calls() {
        let (depth, fanout) = (7u64, 4u64);
        let store = SyntheticTree {
            depth,
            calls: AtomicU64::new(0),
        };
        let seen = Rc::new(RefCell::new(0u64));
        let mut query = BulkQuery::new(&store);
        visit(&mut query, node_hash(0, 0), fanout, Rc::clone(&seen));
        query.flush();

        let total: u64 = (0..depth).map(|l| fanout.pow(l as u32)).sum();
        assert_eq!(*seen.borrow(), total);

        let stats = query.stats();
        // Every node requests its children, so the leaves' missing children
        // are requested too.
        let requested = 1 + total * fanout;
        assert_eq!(stats.requests, requested);
        assert!(stats.store_calls <= requested / 8, "{stats:?}");
        assert_eq!(stats.store_calls, store.calls.load(Ordering::Relaxed));

        // Breadth-first would hold a whole level (4^6 = 4096 hashes) at once.
        let bound = (depth * fanout) as usize * NODES.batch_size;
        assert!(stats.peak_pending <= bound, "{stats:?}");
        assert!(stats.peak_pending < fanout.pow((depth - 1) as u32) as usize);
    }

    #[test]
    fn newest_requests_are_fetched_first() {
        let store = InMemoryObjectStore::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let one = RequestType::new("one", 1);
        let mut query = BulkQuery::new(&store);
        for n in 0..3u8 {
            let order = Rc::clone(&order);
            query.request(one, ObjectHash::from_hash([n; 32]), move |_, _| {
                order.borrow_mut().push(n);
            });
        }
        query.flush();
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert_eq!(query.stats().store_calls, 3);
    }

    // ---- deduplication ----

    #[test]
    fn duplicate_requests_share_one_fetch() {
        let store = InMemoryObjectStore::new();
        let hits = Rc::new(RefCell::new(0));
        let mut query = BulkQuery::new(&store);
        let hash = ObjectHash::from_hash([5; 32]);
        for _ in 0..3 {
            let hits = Rc::clone(&hits);
            query.request(NODES, hash, move |_, _| *hits.borrow_mut() += 1);
        }
        assert_eq!(query.pending_hashes(), 1);
        query.flush();
        assert_eq!(*hits.borrow(), 3);
        assert_eq!(store.stats().hashes_requested, 1);
        assert_eq!(query.stats().deduplicated, 2);
    }

    // ---- failures ----

    #[test]
    fn store_failure_reaches_every_callback_without_requeue() {
        let store = FailingStore;
        let failures = Rc::new(RefCell::new(0));
        let mut query = BulkQuery::new(&store);
        for n in 0..4u8 {
            let failures = Rc::clone(&failures);
            query.request(NODES, ObjectHash::from_hash([n; 32]), move |_, r| {
                assert!(matches!(r, Err(StoreError::Backend(_))));
                *failures.borrow_mut() += 1;
            });
        }
        query.flush();
        assert_eq!(*failures.borrow(), 4);
        assert!(query.is_idle());
        assert_eq!(query.stats().store_calls, 1);
    }

    // ---- deferred work ----

    #[test]
    fn deferred_continuations_run_before_fetches() {
        let store = InMemoryObjectStore::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut query = BulkQuery::new(&store);
        let l1 = Rc::clone(&log);
        query.request(NODES, ObjectHash::from_hash([1; 32]), move |_, _| {
            l1.borrow_mut().push("fetched")
        });
        let l2 = Rc::clone(&log);
        query.defer(move |_| l2.borrow_mut().push("deferred"));
        query.flush();
        assert_eq!(*log.borrow(), vec!["deferred", "fetched"]);
    }

    #[test]
    fn fetch_one_returns_bytes() {
        let store = InMemoryObjectStore::new();
        let hash = ObjectHash::from_hash([8; 32]);
        store.put(hash, b"payload".to_vec()).unwrap();
        assert_eq!(fetch_one(&store, NODES, hash).unwrap(), Some(b"payload".to_vec()));
        let missing = ObjectHash::from_hash([9; 32]);
        assert_eq!(fetch_one(&store, NODES, missing).unwrap(), None);
    }
}
