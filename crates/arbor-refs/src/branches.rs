//! Branch heads and the repository and branch lists.
//!
//! Every method runs against a caller-provided [`StoreTx`], so several
//! reference updates compose into one atomic transaction. The head pointer
//! is only moved by [`BranchStore::compare_and_set`] and
//! [`BranchStore::set_head`].

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use arbor_store::{Namespace, StoreKey};
use arbor_txn::StoreTx;
use arbor_types::{BranchReference, ObjectHash, RepositoryId};

use crate::error::{RefError, RefResult};
use crate::names::validate_branch_name;
use crate::types::BranchKeys;

/// Reference bookkeeping for all repositories of one key/value store.
#[derive(Clone, Copy, Debug, Default)]
pub struct BranchStore {
    /// Layout assumed for branches of repositories missing from both lists.
    unknown_layout: BranchKeys,
}

impl BranchStore {
    pub fn new(unknown_layout: BranchKeys) -> Self {
        Self { unknown_layout }
    }

    // -----------------------------------------------------------------------
    // Repositories
    // -----------------------------------------------------------------------

    pub fn repositories(&self, tx: &StoreTx<'_>) -> RefResult<BTreeSet<RepositoryId>> {
        let mut all = BTreeSet::new();
        for layout in BranchKeys::ALL {
            all.extend(self.repositories_in(tx, layout)?);
        }
        Ok(all)
    }

    /// The layout a repository was created with, or `None` if it is unknown.
    pub fn layout_of(&self, tx: &StoreTx<'_>, repository: &RepositoryId) -> RefResult<Option<BranchKeys>> {
        for layout in BranchKeys::ALL {
            if self.repositories_in(tx, layout)?.contains(repository) {
                return Ok(Some(layout));
            }
        }
        Ok(None)
    }

    /// Register a repository with a single branch pointing at `head`.
    pub fn create_repository(
        &self,
        tx: &StoreTx<'_>,
        repository: &RepositoryId,
        layout: BranchKeys,
        branch: &str,
        head: ObjectHash,
    ) -> RefResult<()> {
        validate_branch_name(branch)?;
        if self.layout_of(tx, repository)?.is_some() {
            return Err(RefError::RepositoryExists(repository.clone()));
        }
        let mut list = self.repositories_in(tx, layout)?;
        list.insert(repository.clone());
        put_encoded(tx, layout.repositories_key(), &list)?;

        let reference = BranchReference::new(repository.clone(), branch);
        put_encoded(tx, layout.branch_list_key(repository), &BTreeSet::from([branch.to_string()]))?;
        put_encoded(tx, layout.head_key(&reference), &head)?;
        info!(%repository, ?layout, %branch, head = %head.short_hex(), "repository created");
        Ok(())
    }

    /// Remove a repository's branch records and, for isolated repositories,
    /// its whole namespace. Returns `false` if it did not exist.
    pub fn remove_repository(&self, tx: &StoreTx<'_>, repository: &RepositoryId) -> RefResult<bool> {
        let Some(layout) = self.layout_of(tx, repository)? else {
            return Ok(false);
        };
        match layout {
            BranchKeys::Isolated => {
                tx.remove_namespace(&Namespace::Repository(repository.clone()))?;
            }
            BranchKeys::LegacyGlobal => {
                for branch in self.branches(tx, repository)? {
                    tx.remove(layout.head_key(&BranchReference::new(repository.clone(), branch)))?;
                }
                tx.remove(layout.branch_list_key(repository))?;
            }
        }
        let mut list = self.repositories_in(tx, layout)?;
        list.remove(repository);
        put_encoded(tx, layout.repositories_key(), &list)?;
        info!(%repository, "repository removed");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    pub fn branches(&self, tx: &StoreTx<'_>, repository: &RepositoryId) -> RefResult<BTreeSet<String>> {
        let layout = self.layout_or_default(tx, repository)?;
        Ok(get_decoded(tx, &layout.branch_list_key(repository))?.unwrap_or_default())
    }

    /// The key holding the head of `branch`, for change listeners.
    pub fn head_key(&self, tx: &StoreTx<'_>, branch: &BranchReference) -> RefResult<StoreKey> {
        Ok(self.layout_or_default(tx, &branch.repository)?.head_key(branch))
    }

    pub fn head(&self, tx: &StoreTx<'_>, branch: &BranchReference) -> RefResult<Option<ObjectHash>> {
        get_decoded(tx, &self.head_key(tx, branch)?)
    }

    /// Like [`head`](Self::head) but a missing branch is an error.
    pub fn require_head(&self, tx: &StoreTx<'_>, branch: &BranchReference) -> RefResult<ObjectHash> {
        self.head(tx, branch)?
            .ok_or_else(|| RefError::BranchNotFound(branch.clone()))
    }

    /// Point `branch` at `head`, creating the branch if needed.
    pub fn set_head(&self, tx: &StoreTx<'_>, branch: &BranchReference, head: ObjectHash) -> RefResult<()> {
        validate_branch_name(&branch.branch)?;
        let layout = self.require_layout(tx, &branch.repository)?;
        let mut names = self.branches(tx, &branch.repository)?;
        if names.insert(branch.branch.clone()) {
            put_encoded(tx, layout.branch_list_key(&branch.repository), &names)?;
        }
        put_encoded(tx, layout.head_key(branch), &head)?;
        debug!(%branch, head = %head.short_hex(), "branch head set");
        Ok(())
    }

    /// Move `branch` to `new` only if it still points at `expected`
    /// (`None` = the branch does not exist). Returns whether it moved.
    pub fn compare_and_set(
        &self,
        tx: &StoreTx<'_>,
        branch: &BranchReference,
        expected: Option<ObjectHash>,
        new: ObjectHash,
    ) -> RefResult<bool> {
        let current = self.head(tx, branch)?;
        if current != expected {
            debug!(
                %branch,
                expected = ?expected.map(|h| h.short_hex()),
                current = ?current.map(|h| h.short_hex()),
                "branch moved concurrently"
            );
            return Ok(false);
        }
        self.set_head(tx, branch, new)?;
        Ok(true)
    }

    /// Delete a branch. Returns `false` if it did not exist.
    pub fn remove_branch(&self, tx: &StoreTx<'_>, branch: &BranchReference) -> RefResult<bool> {
        let layout = self.require_layout(tx, &branch.repository)?;
        let mut names = self.branches(tx, &branch.repository)?;
        let listed = names.remove(&branch.branch);
        let key = layout.head_key(branch);
        let existed = tx.get(&key)?.is_some();
        if listed {
            put_encoded(tx, layout.branch_list_key(&branch.repository), &names)?;
        }
        tx.remove(key)?;
        if listed || existed {
            info!(%branch, "branch removed");
        }
        Ok(listed || existed)
    }

    fn repositories_in(&self, tx: &StoreTx<'_>, layout: BranchKeys) -> RefResult<BTreeSet<RepositoryId>> {
        Ok(get_decoded(tx, &layout.repositories_key())?.unwrap_or_default())
    }

    fn layout_or_default(&self, tx: &StoreTx<'_>, repository: &RepositoryId) -> RefResult<BranchKeys> {
        Ok(self.layout_of(tx, repository)?.unwrap_or(self.unknown_layout))
    }

    fn require_layout(&self, tx: &StoreTx<'_>, repository: &RepositoryId) -> RefResult<BranchKeys> {
        self.layout_of(tx, repository)?
            .ok_or_else(|| RefError::RepositoryNotFound(repository.clone()))
    }
}

fn get_decoded<T: DeserializeOwned>(tx: &StoreTx<'_>, key: &StoreKey) -> RefResult<Option<T>> {
    match tx.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn put_encoded<T: Serialize>(tx: &StoreTx<'_>, key: StoreKey, value: &T) -> RefResult<()> {
    tx.put(key, bincode::serialize(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{InMemoryKeyValueStore, KeyValueStore};
    use arbor_txn::TransactionalStore;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryKeyValueStore>, TransactionalStore, BranchStore) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = TransactionalStore::new(kv.clone());
        (kv, store, BranchStore::default())
    }

    fn repo(id: &str) -> RepositoryId {
        RepositoryId::new(id).unwrap()
    }

    fn hash(b: u8) -> ObjectHash {
        ObjectHash::from_hash([b; 32])
    }

    // ---- repositories ----

    #[test]
    fn create_and_list_repositories() {
        let (_, store, refs) = setup();
        store
            .run_write(|tx| {
                refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "master", hash(1))?;
                refs.create_repository(tx, &repo("b"), BranchKeys::LegacyGlobal, "main", hash(2))
            })
            .unwrap();
        store
            .run_read(|tx| {
                assert_eq!(refs.repositories(tx)?, BTreeSet::from([repo("a"), repo("b")]));
                assert_eq!(refs.layout_of(tx, &repo("b"))?, Some(BranchKeys::LegacyGlobal));
                assert_eq!(refs.branches(tx, &repo("a"))?, BTreeSet::from(["master".to_string()]));
                let main = BranchReference::new(repo("b"), "main");
                assert_eq!(refs.head(tx, &main)?, Some(hash(2)));
                Ok::<_, RefError>(())
            })
            .unwrap();
    }

    #[test]
    fn duplicate_repository_is_rejected() {
        let (_, store, refs) = setup();
        store
            .run_write(|tx| refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "master", hash(1)))
            .unwrap();
        let again = store.run_write(|tx| {
            refs.create_repository(tx, &repo("a"), BranchKeys::LegacyGlobal, "master", hash(1))
        });
        assert!(matches!(again, Err(RefError::RepositoryExists(_))));
    }

    #[test]
    fn removing_a_repository_keeps_the_others() {
        for layout in BranchKeys::ALL {
            let (kv, store, refs) = setup();
            store
                .run_write(|tx| {
                    refs.create_repository(tx, &repo("gone"), layout, "master", hash(1))?;
                    refs.create_repository(tx, &repo("kept"), layout, "master", hash(2))?;
                    refs.set_head(tx, &BranchReference::new(repo("gone"), "dev"), hash(3))
                })
                .unwrap();
            let removed = store.run_write(|tx| refs.remove_repository(tx, &repo("gone"))).unwrap();
            assert!(removed);
            assert!(kv
                .keys_in(&Namespace::Repository(repo("gone")))
                .unwrap()
                .is_empty());
            let global = kv.keys_in(&Namespace::Global).unwrap();
            assert!(global.iter().all(|k| !k.name.contains(":gone:")), "{layout:?}");
            store
                .run_read(|tx| {
                    assert_eq!(refs.repositories(tx)?, BTreeSet::from([repo("kept")]));
                    let head = refs.head(tx, &BranchReference::new(repo("kept"), "master"))?;
                    assert_eq!(head, Some(hash(2)));
                    Ok::<_, RefError>(())
                })
                .unwrap();
            let again = store.run_write(|tx| refs.remove_repository(tx, &repo("gone"))).unwrap();
            assert!(!again);
        }
    }

    // ---- branches ----

    #[test]
    fn compare_and_set_only_moves_expected_head() {
        let (_, store, refs) = setup();
        let master = BranchReference::new(repo("a"), "master");
        store
            .run_write(|tx| refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "master", hash(1)))
            .unwrap();
        let moved = store
            .run_write(|tx| refs.compare_and_set(tx, &master, Some(hash(9)), hash(2)))
            .unwrap();
        assert!(!moved);
        let moved = store
            .run_write(|tx| refs.compare_and_set(tx, &master, Some(hash(1)), hash(2)))
            .unwrap();
        assert!(moved);
        let head = store.run_read(|tx| refs.require_head(tx, &master)).unwrap();
        assert_eq!(head, hash(2));

        // Creating a branch expects it to be absent.
        let dev = BranchReference::new(repo("a"), "dev");
        assert!(store
            .run_write(|tx| refs.compare_and_set(tx, &dev, None, hash(5)))
            .unwrap());
        assert!(!store
            .run_write(|tx| refs.compare_and_set(tx, &dev, None, hash(6)))
            .unwrap());
    }

    #[test]
    fn remove_branch_updates_the_list() {
        let (_, store, refs) = setup();
        let dev = BranchReference::new(repo("a"), "dev");
        store
            .run_write(|tx| {
                refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "master", hash(1))?;
                refs.set_head(tx, &dev, hash(2))
            })
            .unwrap();
        assert!(store.run_write(|tx| refs.remove_branch(tx, &dev)).unwrap());
        assert!(!store.run_write(|tx| refs.remove_branch(tx, &dev)).unwrap());
        store
            .run_read(|tx| {
                assert_eq!(refs.branches(tx, &repo("a"))?, BTreeSet::from(["master".to_string()]));
                assert!(matches!(refs.require_head(tx, &dev), Err(RefError::BranchNotFound(_))));
                Ok::<_, RefError>(())
            })
            .unwrap();
    }

    #[test]
    fn invalid_names_and_unknown_repositories() {
        let (_, store, refs) = setup();
        let bad = store.run_write(|tx| {
            refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "no spaces", hash(1))
        });
        assert!(matches!(bad, Err(RefError::InvalidBranchName { .. })));
        let missing = store.run_write(|tx| {
            refs.set_head(tx, &BranchReference::new(repo("nope"), "master"), hash(1))
        });
        assert!(matches!(missing, Err(RefError::RepositoryNotFound(_))));
    }

    #[test]
    fn writes_need_a_write_transaction() {
        let (_, store, refs) = setup();
        let result = store.run_read(|tx| {
            refs.create_repository(tx, &repo("a"), BranchKeys::Isolated, "master", hash(1))
        });
        assert!(matches!(
            result,
            Err(RefError::Transaction(arbor_txn::TxError::IllegalTransactionState(_)))
        ));
    }
}
