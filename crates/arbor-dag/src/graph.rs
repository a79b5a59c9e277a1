//! The version graph: storing, loading and relating versions.
//!
//! Versions form a DAG through their `base` and `merged` pointers. The graph
//! itself holds no state beyond a decoded-version cache; every relation is
//! computed by walking stored records.
//!
//! Version records and operation lists are read through the bulk query
//! executor like tree chunks. Walks over the DAG go level by level, so all
//! parents discovered on one level share a batched store read.
//!
//! # Invariants
//!
//! - Replaying a version's operations on its base version's tree yields the
//!   version's tree.
//! - A merge version always has a base.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use arbor_ops::{OpError, OpResult, Operation, TreeResolver};
use arbor_store::{
    fetch_one, BulkQuery, ObjectCache, ObjectStore, RequestType, StoreError, StoredObject,
};
use arbor_tree::{ChunkLoader, Tree, DEFAULT_CHUNK_BATCH};
use arbor_types::{ObjectHash, Timestamp, VersionId};

use crate::error::{DagError, DagResult};
use crate::history::History;
use crate::version::{OperationList, Version, VersionData, VersionOperations};

/// Default number of version hashes fetched per store round trip.
pub const DEFAULT_VERSION_BATCH: usize = 1000;

/// Tuning for a [`VersionGraph`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    /// Decoded chunks and versions kept in memory, each.
    pub cache_capacity: usize,
    /// Chunk hashes fetched per store round trip.
    pub chunk_batch_size: usize,
    /// Version and operation-list hashes fetched per store round trip.
    pub version_batch_size: usize,
    /// Versions with more operations store them out of line.
    pub inline_operations_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100_000,
            chunk_batch_size: DEFAULT_CHUNK_BATCH,
            version_batch_size: DEFAULT_VERSION_BATCH,
            inline_operations_limit: 16,
        }
    }
}

/// Everything needed to write a new version.
#[derive(Clone, Debug)]
pub struct NewVersion<'a> {
    pub id: VersionId,
    pub tree: &'a Tree,
    pub base: Option<&'a Version>,
    pub merged: Option<&'a Version>,
    pub operations: Vec<Operation>,
    pub author: Option<String>,
    pub time: Timestamp,
}

/// Order among versions that are ready at the same time in
/// [`VersionGraph::linear_history`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadyOrder {
    #[default]
    SmallestIdFirst,
    LargestIdFirst,
}

pub struct VersionGraph {
    store: Arc<dyn ObjectStore>,
    loader: Arc<ChunkLoader>,
    versions: ObjectCache<VersionData>,
    version_request: RequestType,
    operations_request: RequestType,
    inline_operations_limit: usize,
}

impl VersionGraph {
    pub fn new(store: Arc<dyn ObjectStore>, config: GraphConfig) -> Self {
        let loader = ChunkLoader::new(Arc::clone(&store), config.cache_capacity)
            .with_batch_size(config.chunk_batch_size);
        Self {
            store,
            loader: Arc::new(loader),
            versions: ObjectCache::new(config.cache_capacity),
            version_request: RequestType::new("versions", config.version_batch_size),
            operations_request: RequestType::new("operation-lists", config.version_batch_size),
            inline_operations_limit: config.inline_operations_limit,
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn loader(&self) -> &Arc<ChunkLoader> {
        &self.loader
    }

    /// A tree holding only the root node, saved to the store.
    pub fn new_tree(&self) -> DagResult<Tree> {
        Ok(Tree::create(Arc::clone(&self.loader))?)
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    /// Load a version, failing with [`DagError::VersionNotFound`] if the
    /// hash is unknown.
    pub fn load(&self, hash: &ObjectHash) -> DagResult<Version> {
        self.get(hash)?.ok_or(DagError::VersionNotFound(*hash))
    }

    pub fn get(&self, hash: &ObjectHash) -> DagResult<Option<Version>> {
        if let Some(data) = self.versions.get(hash) {
            return Ok(Some(Version::new(*hash, data)));
        }
        match fetch_one(self.store(), self.version_request, *hash)? {
            Some(bytes) => Ok(Some(self.decode_version(*hash, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Load several versions with batched store reads. The result follows
    /// the order of `hashes`; duplicates are fetched once.
    pub fn load_all(&self, hashes: &[ObjectHash]) -> DagResult<Vec<Version>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let slots: Rc<RefCell<Vec<Option<DagResult<Version>>>>> =
            Rc::new(RefCell::new(hashes.iter().map(|_| None).collect()));
        let mut query = BulkQuery::new(self.store());
        for (i, hash) in hashes.iter().enumerate() {
            let out = Rc::clone(&slots);
            self.request_version(&mut query, *hash, move |_, result| {
                out.borrow_mut()[i] = Some(result);
            });
        }
        query.flush();
        drop(query);
        let slots = slots.take();
        hashes
            .iter()
            .zip(slots)
            .map(|(hash, slot)| slot.unwrap_or(Err(DagError::VersionNotFound(*hash))))
            .collect()
    }

    /// Resolve a version inside a bulk query reading from this graph's
    /// store.
    ///
    /// Cached versions are handed to `then` on the query's next step, others
    /// are batched with every other pending version request. An unknown hash
    /// yields [`DagError::VersionNotFound`].
    pub fn request_version<'s, F>(&'s self, query: &mut BulkQuery<'s>, hash: ObjectHash, then: F)
    where
        F: FnOnce(&mut BulkQuery<'s>, DagResult<Version>) + 's,
    {
        if let Some(data) = self.versions.get(&hash) {
            let version = Version::new(hash, data);
            query.defer(move |q| then(q, Ok(version)));
            return;
        }
        query.request(self.version_request, hash, move |q, result| {
            let version = result.map_err(DagError::from).and_then(|bytes| match bytes {
                Some(bytes) => self.decode_version(hash, bytes),
                None => Err(DagError::VersionNotFound(hash)),
            });
            then(q, version)
        });
    }

    fn decode_version(&self, hash: ObjectHash, bytes: &[u8]) -> DagResult<Version> {
        let data: VersionData = StoredObject::from_bytes(&hash, bytes)?.decode()?;
        let data = self.versions.insert(hash, Arc::new(data));
        Ok(Version::new(hash, data))
    }

    /// Keep `version` in memory until a matching [`unpin`](Self::unpin).
    pub fn pin(&self, version: &Version) {
        self.versions.pin(version.hash(), Arc::clone(version.shared_data()));
    }

    pub fn unpin(&self, hash: &ObjectHash) {
        self.versions.unpin(hash);
    }

    pub fn pinned_versions(&self) -> usize {
        self.versions.pinned_len()
    }

    pub fn base(&self, version: &Version) -> DagResult<Option<Version>> {
        version.base_hash().map(|h| self.load(&h)).transpose()
    }

    pub fn merged(&self, version: &Version) -> DagResult<Option<Version>> {
        version.merged_hash().map(|h| self.load(&h)).transpose()
    }

    /// The version's tree. Chunks are loaded lazily.
    pub fn tree(&self, version: &Version) -> Tree {
        Tree::load(Arc::clone(&self.loader), version.tree_hash())
    }

    pub fn operations(&self, version: &Version) -> DagResult<Vec<Operation>> {
        match &version.data().operations {
            VersionOperations::Inline { operations } => Ok(operations.clone()),
            VersionOperations::Stored { hash, .. } => {
                let bytes = fetch_one(self.store(), self.operations_request, *hash)?
                    .ok_or(StoreError::MissingEntry(*hash))?;
                let list: OperationList = StoredObject::from_bytes(hash, &bytes)?.decode()?;
                Ok(list.operations)
            }
        }
    }

    /// The tree obtained by replaying the version's operations on its
    /// base's tree, or on a fresh tree for an initial version.
    pub fn replayed_tree(&self, version: &Version) -> DagResult<Tree> {
        let mut tree = match self.base(version)? {
            Some(base) => self.tree(&base),
            None => self.new_tree()?,
        };
        for op in self.operations(version)? {
            tree = op.apply(&tree, self)?;
        }
        Ok(tree)
    }

    /// Lazy reverse-chronological history starting at `head`.
    pub fn history(&self, head: &Version) -> History<'_> {
        History::new(self, head.clone())
    }

    // ---------------------------------------------------------------
    // Writing
    // ---------------------------------------------------------------

    pub fn create_version(&self, new: NewVersion<'_>) -> DagResult<Version> {
        if new.merged.is_some() && new.base.is_none() {
            return Err(DagError::InvalidVersion {
                id: new.id.to_string(),
                reason: "merge version without base".into(),
            });
        }
        let operations = if new.operations.len() > self.inline_operations_limit {
            let count = new.operations.len();
            let list = OperationList {
                operations: new.operations,
            };
            let hash = self.store.write(&StoredObject::encode(&list)?)?;
            VersionOperations::Stored { hash, count }
        } else {
            VersionOperations::Inline {
                operations: new.operations,
            }
        };
        let data = VersionData {
            id: new.id,
            tree: new.tree.hash(),
            base: new.base.map(Version::hash),
            merged: new.merged.map(Version::hash),
            operations,
            author: new.author,
            time: new.time,
        };
        let hash = self.store.write(&StoredObject::encode(&data)?)?;
        let data = self.versions.insert(hash, Arc::new(data));
        let version = Version::new(hash, data);
        debug!(
            version = %hash.short_hex(),
            id = %version.id(),
            ops = version.operation_count(),
            merge = version.is_merge(),
            "created version"
        );
        Ok(version)
    }

    /// A version without base and without operations.
    pub fn create_initial(
        &self,
        id: VersionId,
        tree: &Tree,
        author: Option<String>,
        time: Timestamp,
    ) -> DagResult<Version> {
        self.create_version(NewVersion {
            id,
            tree,
            base: None,
            merged: None,
            operations: Vec::new(),
            author,
            time,
        })
    }

    // ---------------------------------------------------------------
    // Relations
    // ---------------------------------------------------------------

    /// Breadth-first walk from `start` through base and merged pointers.
    ///
    /// Every version is visited once; hashes in `excluded` are neither
    /// loaded nor visited. `visit` returns whether to continue below the
    /// version. The parents found on one level are loaded together.
    fn walk<F>(
        &self,
        start: &[&Version],
        excluded: &HashSet<ObjectHash>,
        mut visit: F,
    ) -> DagResult<()>
    where
        F: FnMut(&Version) -> bool,
    {
        let mut seen = HashSet::new();
        let mut level: Vec<Version> = start
            .iter()
            .filter(|v| !excluded.contains(&v.hash()) && seen.insert(v.hash()))
            .map(|v| (*v).clone())
            .collect();
        while !level.is_empty() {
            let mut parents = Vec::new();
            for version in &level {
                if visit(version) {
                    parents.extend(
                        version
                            .parent_hashes()
                            .filter(|p| !excluded.contains(p) && seen.insert(*p)),
                    );
                }
            }
            level = self.load_all(&parents)?;
        }
        Ok(())
    }

    /// `true` if `ancestor` is reachable from `descendant` through base or
    /// merged pointers. A version is its own ancestor.
    pub fn is_ancestor(&self, ancestor: &Version, descendant: &Version) -> DagResult<bool> {
        let target = ancestor.hash();
        let mut found = false;
        self.walk(&[descendant], &HashSet::new(), |v| {
            found |= v.hash() == target;
            !found
        })?;
        Ok(found)
    }

    /// Hashes of `version` and everything reachable from it.
    pub fn ancestors(&self, version: &Version) -> DagResult<HashSet<ObjectHash>> {
        let mut reached = HashSet::new();
        self.walk(&[version], &HashSet::new(), |v| reached.insert(v.hash()))?;
        Ok(reached)
    }

    /// Nearest version on both base chains.
    ///
    /// The chains are walked alternately; once they meet they coincide, so
    /// the result does not depend on the argument order. The next base of
    /// both chains is fetched in one batch.
    pub fn common_base_version(&self, a: &Version, b: &Version) -> DagResult<Option<Version>> {
        let mut left = Some(a.clone());
        let mut right = Some(b.clone());
        let mut left_seen = HashSet::new();
        let mut right_seen = HashSet::new();
        while left.is_some() || right.is_some() {
            if let Some(l) = &left {
                left_seen.insert(l.hash());
            }
            if let Some(r) = &right {
                right_seen.insert(r.hash());
            }
            if let Some(l) = &left {
                if right_seen.contains(&l.hash()) {
                    return Ok(left);
                }
            }
            if let Some(r) = &right {
                if left_seen.contains(&r.hash()) {
                    return Ok(right);
                }
            }
            let left_base = left.as_ref().and_then(Version::base_hash);
            let right_base = right.as_ref().and_then(Version::base_hash);
            let wanted: Vec<ObjectHash> = left_base.into_iter().chain(right_base).collect();
            let mut loaded = self.load_all(&wanted)?.into_iter();
            left = left_base.and_then(|_| loaded.next());
            right = right_base.and_then(|_| loaded.next());
        }
        Ok(None)
    }

    /// Ids of the newest non-merge versions behind `version`, looking
    /// through merge versions.
    pub fn latest_non_merges(&self, version: &Version) -> DagResult<BTreeSet<VersionId>> {
        let mut result = BTreeSet::new();
        self.walk(&[version], &HashSet::new(), |v| {
            if v.is_merge() {
                return true;
            }
            result.insert(v.id());
            false
        })?;
        Ok(result)
    }

    /// Non-merge versions reachable from `heads` but not from `base`, in a
    /// topological order: every version comes after its ancestors. Among
    /// versions that are ready at the same time, `order` decides.
    ///
    /// The result depends only on the set of heads, not on their order.
    pub fn linear_history(
        &self,
        base: Option<&Version>,
        heads: &[&Version],
        order: ReadyOrder,
    ) -> DagResult<Vec<Version>> {
        let excluded = match base {
            Some(base) => self.ancestors(base)?,
            None => HashSet::new(),
        };

        let mut versions: HashMap<ObjectHash, Version> = HashMap::new();
        self.walk(heads, &excluded, |v| {
            versions.insert(v.hash(), v.clone());
            true
        })?;

        let mut waiting: HashMap<ObjectHash, usize> = HashMap::new();
        let mut children: HashMap<ObjectHash, Vec<ObjectHash>> = HashMap::new();
        for v in versions.values() {
            let parents: BTreeSet<ObjectHash> = v
                .parent_hashes()
                .filter(|p| versions.contains_key(p))
                .collect();
            for parent in &parents {
                children.entry(*parent).or_default().push(v.hash());
            }
            waiting.insert(v.hash(), parents.len());
        }

        let mut ready_merges: Vec<ObjectHash> = Vec::new();
        let mut ready: BTreeSet<(VersionId, ObjectHash)> = BTreeSet::new();
        for v in versions.values() {
            if waiting.get(&v.hash()) == Some(&0) {
                make_ready(v, &mut ready_merges, &mut ready);
            }
        }

        let mut result = Vec::new();
        loop {
            // Merge versions contribute nothing themselves; release their
            // children before choosing among regular versions.
            let next = match ready_merges.pop() {
                Some(hash) => hash,
                None => {
                    let picked = match order {
                        ReadyOrder::SmallestIdFirst => ready.pop_first(),
                        ReadyOrder::LargestIdFirst => ready.pop_last(),
                    };
                    match picked {
                        Some((_, hash)) => hash,
                        None => break,
                    }
                }
            };
            let Some(version) = versions.get(&next) else {
                continue;
            };
            if !version.is_merge() {
                result.push(version.clone());
            }
            for child in children.get(&next).into_iter().flatten() {
                let Some(count) = waiting.get_mut(child) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    if let Some(child) = versions.get(child) {
                        make_ready(child, &mut ready_merges, &mut ready);
                    }
                }
            }
        }
        Ok(result)
    }
}

fn make_ready(
    version: &Version,
    merges: &mut Vec<ObjectHash>,
    ready: &mut BTreeSet<(VersionId, ObjectHash)>,
) {
    if version.is_merge() {
        merges.push(version.hash());
    } else {
        ready.insert((version.id(), version.hash()));
    }
}

impl TreeResolver for VersionGraph {
    fn resolve_tree(&self, version: &ObjectHash) -> OpResult<Tree> {
        match self.load(version) {
            Ok(v) => Ok(self.tree(&v)),
            Err(DagError::VersionNotFound(hash)) => Err(OpError::VersionNotFound(hash)),
            Err(e) => Err(OpError::Resolve {
                hash: *version,
                reason: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for VersionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionGraph")
            .field("cached_versions", &self.versions.len())
            .field("cached_chunks", &self.loader.cache().len())
            .field("inline_operations_limit", &self.inline_operations_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ops::WorkingBranch;
    use arbor_store::{InMemoryObjectStore, ObjectKind};
    use arbor_types::NodeId;

    fn graph() -> (Arc<InMemoryObjectStore>, VersionGraph) {
        let store = Arc::new(InMemoryObjectStore::new());
        let graph = VersionGraph::new(store.clone(), GraphConfig::default());
        (store, graph)
    }

    fn vid(n: u64) -> VersionId {
        VersionId::new(n)
    }

    /// A version without operations on top of `base`.
    fn version(graph: &VersionGraph, id: u64, base: Option<&Version>) -> Version {
        let tree = match base {
            Some(b) => graph.tree(b),
            None => graph.new_tree().unwrap(),
        };
        graph
            .create_version(NewVersion {
                id: vid(id),
                tree: &tree,
                base,
                merged: None,
                operations: Vec::new(),
                author: None,
                time: Timestamp::from_secs(id as i64),
            })
            .unwrap()
    }

    fn merge(graph: &VersionGraph, id: u64, base: &Version, merged: &Version) -> Version {
        graph
            .create_version(NewVersion {
                id: vid(id),
                tree: &graph.tree(base),
                base: Some(base),
                merged: Some(merged),
                operations: Vec::new(),
                author: None,
                time: Timestamp::from_secs(id as i64),
            })
            .unwrap()
    }

    fn ids(versions: &[Version]) -> Vec<u64> {
        versions.iter().map(|v| v.id().as_u64()).collect()
    }

    fn linear(graph: &VersionGraph, a: &Version, b: &Version, order: ReadyOrder) -> Vec<u64> {
        let base = graph.common_base_version(a, b).unwrap();
        let ab = graph.linear_history(base.as_ref(), &[a, b], order).unwrap();
        let ba = graph.linear_history(base.as_ref(), &[b, a], order).unwrap();
        assert_eq!(ids(&ab), ids(&ba));
        ids(&ab)
    }

    // ---- storage ----

    #[test]
    fn create_then_load() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let fresh = VersionGraph::new(Arc::new(InMemoryObjectStore::new()), GraphConfig::default());
        assert!(matches!(fresh.load(&v1.hash()), Err(DagError::VersionNotFound(_))));
        let loaded = graph.load(&v1.hash()).unwrap();
        assert_eq!(loaded, v1);
        assert_eq!(loaded.data(), v1.data());
    }

    #[test]
    fn merge_without_base_is_rejected() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let tree = graph.tree(&v1);
        let result = graph.create_version(NewVersion {
            id: vid(2),
            tree: &tree,
            base: None,
            merged: Some(&v1),
            operations: Vec::new(),
            author: None,
            time: Timestamp::from_secs(2),
        });
        assert!(matches!(result, Err(DagError::InvalidVersion { .. })));
    }

    #[test]
    fn long_operation_lists_are_stored_out_of_line() {
        let (store, graph) = graph();
        let v1 = version(&graph, 1, None);
        let mut branch = WorkingBranch::new(graph.tree(&v1));
        branch
            .run_write(|tx| {
                for n in 0..20 {
                    tx.add_child_last(NodeId::ROOT, "c", NodeId::new(100 + n), None)?;
                }
                Ok(())
            })
            .unwrap();
        let (ops, tree) = branch.get_pending_changes();
        let v2 = graph
            .create_version(NewVersion {
                id: vid(2),
                tree: &tree,
                base: Some(&v1),
                merged: None,
                operations: ops.clone(),
                author: Some("alice".into()),
                time: Timestamp::from_secs(2),
            })
            .unwrap();

        let VersionOperations::Stored { hash, count } = &v2.data().operations else {
            panic!("expected stored operations");
        };
        assert_eq!(*count, 20);
        assert_eq!(store.read(hash).unwrap().unwrap().kind, ObjectKind::OperationList);
        assert_eq!(graph.operations(&v2).unwrap(), ops);
        assert_eq!(graph.replayed_tree(&v2).unwrap().hash(), v2.tree_hash());
    }

    #[test]
    fn resolver_reports_unknown_versions() {
        let (_, graph) = graph();
        let missing = ObjectHash::from_hash([9; 32]);
        assert!(matches!(
            graph.resolve_tree(&missing),
            Err(OpError::VersionNotFound(h)) if h == missing
        ));
    }

    #[test]
    fn load_all_keeps_order_and_reports_missing() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v2 = version(&graph, 2, Some(&v1));
        let cold = VersionGraph::new(graph.store.clone(), GraphConfig::default());
        let loaded = cold.load_all(&[v2.hash(), v1.hash(), v2.hash()]).unwrap();
        assert_eq!(ids(&loaded), vec![2, 1, 2]);

        let missing = ObjectHash::from_hash([7; 32]);
        assert!(matches!(
            cold.load_all(&[v1.hash(), missing]),
            Err(DagError::VersionNotFound(h)) if h == missing
        ));
    }

    // ---- relations ----

    #[test]
    fn ancestry() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v2 = version(&graph, 2, Some(&v1));
        let v3 = version(&graph, 3, Some(&v1));
        let m = merge(&graph, 4, &v2, &v3);
        assert!(graph.is_ancestor(&v1, &m).unwrap());
        assert!(graph.is_ancestor(&v3, &m).unwrap());
        assert!(graph.is_ancestor(&m, &m).unwrap());
        assert!(!graph.is_ancestor(&v2, &v3).unwrap());
        assert_eq!(graph.latest_non_merges(&m).unwrap(), BTreeSet::from([vid(2), vid(3)]));
    }

    #[test]
    fn common_base_is_symmetric() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v2 = version(&graph, 2, Some(&v1));
        let v3 = version(&graph, 3, Some(&v2));
        let v4 = version(&graph, 4, Some(&v3));
        let v5 = version(&graph, 5, Some(&v2));
        assert_eq!(graph.common_base_version(&v4, &v5).unwrap(), Some(v2.clone()));
        assert_eq!(graph.common_base_version(&v5, &v4).unwrap(), Some(v2));
        assert_eq!(graph.common_base_version(&v4, &v3).unwrap(), Some(v3));
    }

    #[test]
    fn disjoint_histories_have_no_common_base() {
        let (_, graph) = graph();
        let a = version(&graph, 20, None);
        let b = version(&graph, 21, None);
        assert_eq!(graph.common_base_version(&a, &b).unwrap(), None);
    }

    #[test]
    fn cold_walks_batch_version_reads() {
        let (store, graph) = graph();
        let root = version(&graph, 1, None);
        let (chains, length) = (8u64, 12u64);
        let tips: Vec<Version> = (1..=chains)
            .map(|c| {
                (0..length).fold(root.clone(), |base, j| {
                    version(&graph, c * 100 + j, Some(&base))
                })
            })
            .collect();
        let head = tips[1..]
            .iter()
            .enumerate()
            .fold(tips[0].clone(), |head, (i, tip)| {
                merge(&graph, 10_000 + i as u64, &head, tip)
            });
        let total = 1 + chains * length + (chains - 1);

        let cold = VersionGraph::new(store.clone(), GraphConfig::default());
        let head = cold.load(&head.hash()).unwrap();
        store.reset_stats();
        assert_eq!(cold.ancestors(&head).unwrap().len() as u64, total);

        // One read per level of the walk, not one per version.
        let stats = store.stats();
        assert!(stats.read_calls() < total / 4, "{stats:?} for {total} versions");
        assert!(stats.hashes_requested < total, "{stats:?} for {total} versions");

        store.reset_stats();
        assert!(cold.is_ancestor(&root, &head).unwrap());
        assert_eq!(cold.latest_non_merges(&head).unwrap().len() as u64, chains);
        assert_eq!(store.stats().read_calls(), 0);
    }

    // ---- linear history ----

    #[test]
    fn diverged_by_two_versions() {
        let (_, graph) = graph();
        let v10 = version(&graph, 10, None);
        let v20 = version(&graph, 20, Some(&v10));
        let v21 = version(&graph, 21, Some(&v10));
        assert_eq!(linear(&graph, &v20, &v21, ReadyOrder::SmallestIdFirst), vec![20, 21]);
        assert_eq!(linear(&graph, &v20, &v21, ReadyOrder::LargestIdFirst), vec![21, 20]);
    }

    #[test]
    fn topology_beats_id_order() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v3 = version(&graph, 3, Some(&v1));
        let v9 = version(&graph, 9, Some(&v3));
        let v8 = version(&graph, 8, Some(&v9));
        let v5 = version(&graph, 5, Some(&v1));
        assert_eq!(linear(&graph, &v8, &v5, ReadyOrder::SmallestIdFirst), vec![3, 5, 9, 8]);
    }

    #[test]
    fn merge_versions_are_looked_through() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v3 = version(&graph, 3, Some(&v1));
        let v8 = version(&graph, 8, Some(&v1));
        let m = merge(&graph, 20, &v3, &v8);
        let v4 = version(&graph, 4, Some(&v8));
        assert_eq!(linear(&graph, &m, &v4, ReadyOrder::SmallestIdFirst), vec![3, 8, 4]);
        assert_eq!(linear(&graph, &m, &v4, ReadyOrder::LargestIdFirst), vec![8, 4, 3]);
    }

    #[test]
    fn history_behind_base_is_excluded() {
        let (_, graph) = graph();
        let v1 = version(&graph, 1, None);
        let v2 = version(&graph, 2, Some(&v1));
        let v3 = version(&graph, 3, Some(&v2));
        let v4 = version(&graph, 4, Some(&v2));
        let history = graph
            .linear_history(Some(&v2), &[&v3, &v4], ReadyOrder::SmallestIdFirst)
            .unwrap();
        assert_eq!(ids(&history), vec![3, 4]);
    }
}
