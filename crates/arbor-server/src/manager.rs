//! Repository hosting on top of one key/value store.
//!
//! Every access to the store goes through a transaction scope. Objects live
//! in the repository's namespace and are read and written through a
//! [`ScopedKeyValueStore`], one scope per batch. Branch heads and the
//! repository and branch lists change only inside explicit write
//! transactions. Push is optimistic: the merge is computed without holding
//! any lock, and the head moves by compare-and-set. When the head moved in
//! the meantime the push merges again against the new head and retries.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use arbor_dag::{NewVersion, Version, VersionGraph};
use arbor_merge::VersionMerger;
use arbor_ops::{OpResult, WorkingBranch, WriteTransaction};
use arbor_refs::{BranchStore, RefError};
use arbor_store::{InMemoryKeyValueStore, KeyValueStore, KvObjectStore, Namespace};
use arbor_txn::{ScopedKeyValueStore, TransactionalStore};
use arbor_types::{BranchReference, IdGenerator, ObjectHash, RepositoryId, Timestamp};

use crate::config::{RepositoryConfig, ServerConfig};
use crate::delta::{compute_delta, DeltaFilter, ObjectDelta};
use crate::error::{ServerError, ServerResult};

/// Author and time recorded in a new version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: Option<String>,
    pub time: Timestamp,
}

impl CommitInfo {
    pub fn now(author: Option<String>) -> Self {
        Self {
            author,
            time: Timestamp::now(),
        }
    }

    pub fn at(author: Option<String>, time: Timestamp) -> Self {
        Self { author, time }
    }
}

/// Result of a pull: the branch head and the objects the client lacks.
#[derive(Clone, Debug)]
pub struct Pulled {
    pub version: Version,
    pub delta: ObjectDelta,
}

pub struct RepositoriesManager {
    config: ServerConfig,
    store: Arc<TransactionalStore>,
    refs: BranchStore,
    /// Allocates ids of merge and revert versions created by the server.
    ids: IdGenerator,
    graphs: Mutex<HashMap<RepositoryId, Arc<VersionGraph>>>,
}

impl RepositoriesManager {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: ServerConfig) -> Self {
        Self {
            refs: BranchStore::new(config.branch_keys),
            store: Arc::new(TransactionalStore::new(kv)),
            ids: IdGenerator::random(),
            graphs: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(Arc::new(InMemoryKeyValueStore::new()), config)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transactions(&self) -> &TransactionalStore {
        &self.store
    }

    /// The version graph over a repository's objects.
    ///
    /// Object reads and writes open their own transaction scopes, so the
    /// graph must not be used from inside a scope of this manager's store.
    pub fn graph(&self, repository: &RepositoryId) -> Arc<VersionGraph> {
        let mut graphs = self.graphs.lock();
        let graph = graphs.entry(repository.clone()).or_insert_with(|| {
            let objects = KvObjectStore::new(
                Arc::new(ScopedKeyValueStore::new(Arc::clone(&self.store))),
                Namespace::Repository(repository.clone()),
            );
            Arc::new(VersionGraph::new(Arc::new(objects), self.config.graph_config()))
        });
        Arc::clone(graph)
    }

    // -------------------------------------------------------------------
    // Repositories
    // -------------------------------------------------------------------

    pub fn repositories(&self) -> ServerResult<BTreeSet<RepositoryId>> {
        Ok(self.store.run_read(|tx| self.refs.repositories(tx))?)
    }

    /// Create a repository whose single branch points at an initial version
    /// holding an empty tree.
    pub fn init_repository(
        &self,
        repository: &RepositoryId,
        config: RepositoryConfig,
    ) -> ServerResult<Version> {
        if self.store.run_read(|tx| self.refs.layout_of(tx, repository))?.is_some() {
            return Err(RefError::RepositoryExists(repository.clone()).into());
        }
        let branch = config
            .initial_branch
            .unwrap_or_else(|| self.config.default_branch.clone());
        let layout = config.branch_keys.unwrap_or(self.config.branch_keys);

        let graph = self.graph(repository);
        let tree = graph.new_tree()?;
        let version = graph.create_initial(
            self.ids.next_version_id()?,
            &tree,
            config.author,
            config.created_at.unwrap_or_else(Timestamp::now),
        )?;
        self.store.run_write(|tx| {
            self.refs
                .create_repository(tx, repository, layout, &branch, version.hash())
        })?;
        Ok(version)
    }

    /// Remove a repository with all its branches and objects.
    pub fn delete_repository(&self, repository: &RepositoryId) -> ServerResult<bool> {
        let removed = self.store.run_write(|tx| {
            let removed = self.refs.remove_repository(tx, repository)?;
            if removed {
                tx.remove_namespace(&Namespace::Repository(repository.clone()))?;
            }
            Ok::<_, RefError>(removed)
        })?;
        self.graphs.lock().remove(repository);
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------

    pub fn list_branches(&self, repository: &RepositoryId) -> ServerResult<BTreeSet<String>> {
        self.store.run_read(|tx| {
            if self.refs.layout_of(tx, repository)?.is_none() {
                return Err(RefError::RepositoryNotFound(repository.clone()));
            }
            self.refs.branches(tx, repository)
        })
        .map_err(ServerError::from)
    }

    pub fn delete_branch(&self, branch: &BranchReference) -> ServerResult<bool> {
        Ok(self.store.run_write(|tx| self.refs.remove_branch(tx, branch))?)
    }

    pub fn head_hash(&self, branch: &BranchReference) -> ServerResult<Option<ObjectHash>> {
        Ok(self.store.run_read(|tx| self.refs.head(tx, branch))?)
    }

    pub fn head(&self, branch: &BranchReference) -> ServerResult<Option<Version>> {
        match self.head_hash(branch)? {
            Some(hash) => Ok(Some(self.graph(&branch.repository).load(&hash)?)),
            None => Ok(None),
        }
    }

    fn require_head(&self, branch: &BranchReference) -> ServerResult<Version> {
        self.head(branch)?
            .ok_or_else(|| RefError::BranchNotFound(branch.clone()).into())
    }

    pub fn version(&self, repository: &RepositoryId, hash: &ObjectHash) -> ServerResult<Version> {
        Ok(self.graph(repository).load(hash)?)
    }

    /// Record the changes made by `edit` as a new version on top of `base`.
    /// The version is stored but no branch moves.
    pub fn create_version<F>(
        &self,
        repository: &RepositoryId,
        base: &Version,
        ids: &IdGenerator,
        info: CommitInfo,
        edit: F,
    ) -> ServerResult<Version>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> OpResult<()>,
    {
        let graph = self.graph(repository);
        let mut working = WorkingBranch::with_resolver(graph.tree(base), graph.as_ref());
        working.run_write(edit)?;
        let (operations, tree) = working.get_pending_changes();
        Ok(graph.create_version(NewVersion {
            id: ids.next_version_id()?,
            tree: &tree,
            base: Some(base),
            merged: None,
            operations,
            author: info.author,
            time: info.time,
        })?)
    }

    // -------------------------------------------------------------------
    // Push / pull
    // -------------------------------------------------------------------

    /// Make `version` part of `branch`.
    ///
    /// `expected_base` is the head the client believes the branch has. If
    /// the branch moved, `version` is merged into the actual head instead;
    /// only after `max_push_retries` lost races does the push fail with
    /// [`ServerError::Conflict`]. Returns the new head.
    pub fn push(
        &self,
        branch: &BranchReference,
        version: ObjectHash,
        expected_base: Option<ObjectHash>,
    ) -> ServerResult<Version> {
        let graph = self.graph(&branch.repository);
        let incoming = graph.load(&version)?;
        let merger = VersionMerger::new(&graph, &self.ids).with_policy(self.config.conflict_policy);

        let attempts = self.config.max_push_retries + 1;
        let mut expected = expected_base;
        for attempt in 1..=attempts {
            let candidate = match expected {
                Some(head) => merger.merge_change(&graph.load(&head)?, &incoming)?,
                None => incoming.clone(),
            };
            let moved = self.store.run_write(|tx| {
                self.refs
                    .compare_and_set(tx, branch, expected, candidate.hash())
            })?;
            if moved {
                info!(
                    %branch,
                    head = %candidate.hash().short_hex(),
                    merged = candidate != incoming,
                    attempt,
                    "push accepted"
                );
                return Ok(candidate);
            }
            expected = self.head_hash(branch)?;
            debug!(%branch, attempt, "branch moved during push, merging again");
        }
        warn!(%branch, attempts, "push retries exhausted");
        Err(ServerError::Conflict {
            branch: branch.clone(),
            attempts,
        })
    }

    /// The head of `branch` and every object of it the client does not have,
    /// given that it has `known` and everything reachable from it.
    pub fn pull(
        &self,
        branch: &BranchReference,
        known: Option<ObjectHash>,
        filter: DeltaFilter,
    ) -> ServerResult<Pulled> {
        let version = self.require_head(branch)?;
        let delta = self.compute_delta(&branch.repository, version.hash(), known, filter)?;
        Ok(Pulled { version, delta })
    }

    pub fn compute_delta(
        &self,
        repository: &RepositoryId,
        version: ObjectHash,
        known: Option<ObjectHash>,
        filter: DeltaFilter,
    ) -> ServerResult<ObjectDelta> {
        let graph = self.graph(repository);
        compute_delta(graph.store(), version, known, filter, self.config.bulk_batch_size)
    }

    /// Add a version to `branch` that undoes everything since `target`.
    pub fn revert_to(
        &self,
        branch: &BranchReference,
        target: ObjectHash,
        author: Option<String>,
    ) -> ServerResult<Version> {
        let head = self.require_head(branch)?;
        self.version(&branch.repository, &target)?;
        let revert = self.create_version(
            &branch.repository,
            &head,
            &self.ids,
            CommitInfo::at(author, Timestamp::now().max(head.time())),
            |t| t.revert_to(head.hash(), target),
        )?;
        info!(%branch, target = %target.short_hex(), "reverting");
        self.push(branch, revert.hash(), Some(head.hash()))
    }

    /// Block until the head of `branch` differs from `known` or `timeout`
    /// elapses. Returns the head at that point.
    pub fn wait_for_change(
        &self,
        branch: &BranchReference,
        known: Option<ObjectHash>,
        timeout: Duration,
    ) -> ServerResult<Option<ObjectHash>> {
        let key = self.store.run_read(|tx| self.refs.head_key(tx, branch))?;
        let (changed, changes) = mpsc::channel::<()>();
        let listener = self.store.listen(key, move |_, _| {
            let _ = changed.send(());
        })?;
        let deadline = Instant::now() + timeout;
        let poll = || -> ServerResult<Option<ObjectHash>> {
            loop {
                let head = self.head_hash(branch)?;
                let now = Instant::now();
                if head != known || now >= deadline {
                    return Ok(head);
                }
                match changes.recv_timeout(deadline - now) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Ok(head),
                }
            }
        };
        let result = poll();
        self.store.unlisten(listener);
        result
    }
}

impl fmt::Debug for RepositoriesManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoriesManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("open_graphs", &self.graphs.lock().len())
            .finish()
    }
}
