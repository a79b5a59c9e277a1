//! Object deltas for incremental pulls.
//!
//! A delta holds every stored object reachable from a version that is not
//! reachable from the version the client already has. The walk follows the
//! references each record reports and is driven by one [`BulkQuery`], so
//! objects are fetched in batches rather than one round trip per hash.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use arbor_dag::{DagError, OperationList, VersionData};
use arbor_store::{
    BulkQuery, BulkStats, ObjectData, ObjectKind, ObjectRef, ObjectStore, RequestType, StoreError,
    StoredObject,
};
use arbor_tree::TreeChunk;
use arbor_types::ObjectHash;

use crate::error::ServerResult;

/// Which kinds of objects a pull transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaFilter {
    /// Operation lists stored out of line.
    pub operations: bool,
    /// Versions other than the requested one.
    pub history: bool,
    /// Tree chunks.
    pub tree: bool,
}

impl DeltaFilter {
    pub const ALL: DeltaFilter = DeltaFilter {
        operations: true,
        history: true,
        tree: true,
    };

    /// The requested version and its tree, without older versions.
    pub const HEAD_ONLY: DeltaFilter = DeltaFilter {
        operations: true,
        history: false,
        tree: true,
    };

    fn follows(&self, reference: &ObjectRef) -> bool {
        match reference.kind {
            ObjectKind::TreeChunk => self.tree,
            ObjectKind::Version => self.history,
            ObjectKind::OperationList => self.operations,
        }
    }
}

impl Default for DeltaFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Stored objects missing on the receiving side, keyed by hash. The bytes
/// are exactly what the store holds, so they can be written to another
/// store unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDelta {
    pub version: ObjectHash,
    pub objects: BTreeMap<ObjectHash, Vec<u8>>,
    pub stats: BulkStats,
}

impl ObjectDelta {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Write every object of the delta into `store`.
    pub fn apply_to(&self, store: &dyn ObjectStore) -> ServerResult<()> {
        for (hash, bytes) in &self.objects {
            store.put(*hash, bytes.clone())?;
        }
        Ok(())
    }
}

/// Objects reachable from `version` but not from `known`.
pub fn compute_delta(
    store: &dyn ObjectStore,
    version: ObjectHash,
    known: Option<ObjectHash>,
    filter: DeltaFilter,
    batch_size: usize,
) -> ServerResult<ObjectDelta> {
    let request_type = RequestType::new("delta", batch_size);
    let mut seen = HashSet::new();
    if let Some(known) = known {
        if store.get(&known)?.is_none() {
            return Err(DagError::VersionNotFound(known).into());
        }
        let walk = reachable(store, known, DeltaFilter::ALL, HashSet::new(), false, request_type)?;
        seen = walk.seen;
    }
    if seen.contains(&version) {
        return Ok(ObjectDelta {
            version,
            objects: BTreeMap::new(),
            stats: BulkStats::default(),
        });
    }
    let walk = reachable(store, version, filter, seen, true, request_type)?;
    debug!(
        version = %version.short_hex(),
        known = ?known.map(|h| h.short_hex()),
        objects = walk.objects.len(),
        store_calls = walk.stats.store_calls,
        "computed delta"
    );
    Ok(ObjectDelta {
        version,
        objects: walk.objects,
        stats: walk.stats,
    })
}

#[derive(Default)]
struct Walk {
    seen: HashSet<ObjectHash>,
    objects: BTreeMap<ObjectHash, Vec<u8>>,
    keep_bytes: bool,
    error: Option<StoreError>,
    stats: BulkStats,
}

fn reachable(
    store: &dyn ObjectStore,
    root: ObjectHash,
    filter: DeltaFilter,
    seen: HashSet<ObjectHash>,
    keep_bytes: bool,
    request_type: RequestType,
) -> ServerResult<Walk> {
    let state = Rc::new(RefCell::new(Walk {
        seen,
        keep_bytes,
        ..Walk::default()
    }));
    state.borrow_mut().seen.insert(root);
    let mut query = BulkQuery::new(store);
    visit(&mut query, Rc::clone(&state), root, filter, request_type);
    query.flush();
    let stats = query.stats();
    drop(query);
    let mut walk = state.take();
    walk.stats = stats;
    match walk.error.take() {
        Some(e) => Err(e.into()),
        None => Ok(walk),
    }
}

fn visit<'s>(
    query: &mut BulkQuery<'s>,
    state: Rc<RefCell<Walk>>,
    hash: ObjectHash,
    filter: DeltaFilter,
    request_type: RequestType,
) {
    query.request(request_type, hash, move |q, result| {
        let next = {
            let mut walk = state.borrow_mut();
            if walk.error.is_some() {
                return;
            }
            let decoded = result
                .and_then(|bytes| bytes.ok_or(StoreError::MissingEntry(hash)))
                .and_then(|bytes| Ok((references(&StoredObject::from_bytes(&hash, bytes)?)?, bytes)));
            let (refs, bytes) = match decoded {
                Ok(found) => found,
                Err(e) => {
                    walk.error = Some(e);
                    return;
                }
            };
            if walk.keep_bytes {
                walk.objects.insert(hash, bytes.to_vec());
            }
            refs.into_iter()
                .filter(|r| filter.follows(r) && walk.seen.insert(r.hash))
                .map(|r| r.hash)
                .collect::<Vec<_>>()
        };
        for child in next {
            visit(q, Rc::clone(&state), child, filter, request_type);
        }
    });
}

fn references(object: &StoredObject) -> Result<Vec<ObjectRef>, StoreError> {
    Ok(match object.kind {
        ObjectKind::TreeChunk => object.decode::<TreeChunk>()?.references(),
        ObjectKind::Version => object.decode::<VersionData>()?.references(),
        ObjectKind::OperationList => object.decode::<OperationList>()?.references(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_dag::{GraphConfig, NewVersion, Version, VersionGraph};
    use arbor_ops::WorkingBranch;
    use arbor_store::InMemoryObjectStore;
    use arbor_types::{IdGenerator, NodeId, Timestamp};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        graph: VersionGraph,
        ids: IdGenerator,
    }

    impl Fixture {
        fn new(inline_operations_limit: usize) -> Self {
            let store = Arc::new(InMemoryObjectStore::new());
            let graph = VersionGraph::new(
                store.clone(),
                GraphConfig {
                    inline_operations_limit,
                    ..GraphConfig::default()
                },
            );
            Self {
                store,
                graph,
                ids: IdGenerator::new(4).unwrap(),
            }
        }

        fn initial(&self) -> Version {
            let tree = self.graph.new_tree().unwrap();
            self.graph
                .create_initial(self.ids.next_version_id().unwrap(), &tree, None, Timestamp::from_secs(1))
                .unwrap()
        }

        /// A version adding `n` children to the root of `base`.
        fn add_children(&self, base: &Version, n: usize) -> Version {
            let mut branch = WorkingBranch::with_resolver(self.graph.tree(base), &self.graph);
            branch
                .run_write(|t| {
                    for _ in 0..n {
                        let id = self.ids.next_node_id().unwrap();
                        t.add_child_last(NodeId::ROOT, "children", id, None)?;
                    }
                    Ok(())
                })
                .unwrap();
            let (operations, tree) = branch.get_pending_changes();
            self.graph
                .create_version(NewVersion {
                    id: self.ids.next_version_id().unwrap(),
                    tree: &tree,
                    base: Some(base),
                    merged: None,
                    operations,
                    author: Some("tester".into()),
                    time: Timestamp::from_secs(base.time().as_secs() + 1),
                })
                .unwrap()
        }
    }

    fn kinds(delta: &ObjectDelta) -> Vec<ObjectKind> {
        delta
            .objects
            .iter()
            .map(|(h, b)| StoredObject::from_bytes(h, b).unwrap().kind)
            .collect()
    }

    #[test]
    fn full_delta_rebuilds_the_version_elsewhere() {
        let f = Fixture::new(16);
        let v1 = f.initial();
        let v2 = f.add_children(&v1, 300);

        let delta = compute_delta(f.store.as_ref(), v2.hash(), None, DeltaFilter::ALL, 64).unwrap();
        assert!(delta.objects.contains_key(&v1.hash()));
        assert!(delta.objects.contains_key(&v2.tree_hash()));

        let copy = Arc::new(InMemoryObjectStore::new());
        delta.apply_to(copy.as_ref()).unwrap();
        let graph = VersionGraph::new(copy, GraphConfig::default());
        let loaded = graph.load(&v2.hash()).unwrap();
        let children = graph.tree(&loaded).children(NodeId::ROOT, "children").unwrap();
        assert_eq!(children.len(), 300);
        assert_eq!(graph.replayed_tree(&loaded).unwrap().hash(), loaded.tree_hash());
    }

    #[test]
    fn known_objects_are_left_out() {
        let f = Fixture::new(16);
        let v1 = f.initial();
        let v2 = f.add_children(&v1, 200);
        let v3 = f.add_children(&v2, 1);

        let base = compute_delta(f.store.as_ref(), v2.hash(), None, DeltaFilter::ALL, 64).unwrap();
        let delta =
            compute_delta(f.store.as_ref(), v3.hash(), Some(v2.hash()), DeltaFilter::ALL, 64).unwrap();
        assert!(delta.objects.contains_key(&v3.hash()));
        assert!(!delta.objects.contains_key(&v2.hash()));
        assert!(delta.objects.keys().all(|h| !base.objects.contains_key(h)));
        // One new node touches one path of chunks.
        assert!(delta.len() < base.len() / 2);

        let copy = Arc::new(InMemoryObjectStore::new());
        base.apply_to(copy.as_ref()).unwrap();
        delta.apply_to(copy.as_ref()).unwrap();
        let graph = VersionGraph::new(copy, GraphConfig::default());
        let head = graph.load(&v3.hash()).unwrap();
        assert_eq!(graph.tree(&head).nodes().unwrap().len(), 202);

        let nothing =
            compute_delta(f.store.as_ref(), v2.hash(), Some(v3.hash()), DeltaFilter::ALL, 64).unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn filters_select_object_kinds() {
        let f = Fixture::new(2);
        let v1 = f.initial();
        let v2 = f.add_children(&v1, 5);
        let v3 = f.add_children(&v2, 5);

        let no_tree = DeltaFilter {
            tree: false,
            ..DeltaFilter::ALL
        };
        let delta = compute_delta(f.store.as_ref(), v3.hash(), None, no_tree, 64).unwrap();
        let k = kinds(&delta);
        assert_eq!(k.iter().filter(|k| **k == ObjectKind::Version).count(), 3);
        assert_eq!(k.iter().filter(|k| **k == ObjectKind::OperationList).count(), 2);
        assert!(!k.contains(&ObjectKind::TreeChunk));

        let head_only = compute_delta(f.store.as_ref(), v3.hash(), None, DeltaFilter::HEAD_ONLY, 64).unwrap();
        let k = kinds(&head_only);
        assert_eq!(k.iter().filter(|k| **k == ObjectKind::Version).count(), 1);
        assert_eq!(k.iter().filter(|k| **k == ObjectKind::OperationList).count(), 1);
        assert!(k.contains(&ObjectKind::TreeChunk));

        let no_ops = DeltaFilter {
            operations: false,
            ..DeltaFilter::ALL
        };
        let delta = compute_delta(f.store.as_ref(), v3.hash(), None, no_ops, 64).unwrap();
        assert!(!kinds(&delta).contains(&ObjectKind::OperationList));
    }

    #[test]
    fn unknown_known_version_is_reported() {
        let f = Fixture::new(16);
        let v1 = f.initial();
        let missing = ObjectHash::from_hash([3; 32]);
        let err = compute_delta(f.store.as_ref(), v1.hash(), Some(missing), DeltaFilter::ALL, 64).unwrap_err();
        assert!(err.is_version_not_found());
    }

    #[test]
    fn store_calls_are_batched() {
        let f = Fixture::new(16);
        let v1 = f.initial();
        let v2 = f.add_children(&v1, 2_000);
        let delta = compute_delta(f.store.as_ref(), v2.hash(), None, DeltaFilter::ALL, 5_000).unwrap();
        let total = delta.len() as u64;
        assert!(total > 1_000);
        assert!(
            delta.stats.store_calls * 4 < total,
            "{} calls for {} objects",
            delta.stats.store_calls,
            total
        );
    }
}
