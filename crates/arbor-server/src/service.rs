//! Async façade over [`RepositoriesManager`].
//!
//! Every call checks the permission hook first and then runs the blocking
//! repository work on tokio's blocking pool.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use arbor_dag::{HistoryEntry, HistoryInterval, Version};
use arbor_types::{BranchReference, ObjectHash, RepositoryId, TimeRange};

use crate::auth::{Action, AllowAll, PermissionCheck};
use crate::config::RepositoryConfig;
use crate::delta::DeltaFilter;
use crate::error::{ServerError, ServerResult};
use crate::manager::{Pulled, RepositoriesManager};

#[derive(Clone)]
pub struct ModelService {
    manager: Arc<RepositoriesManager>,
    permissions: Arc<dyn PermissionCheck>,
}

impl ModelService {
    pub fn new(manager: Arc<RepositoriesManager>, permissions: Arc<dyn PermissionCheck>) -> Self {
        Self {
            manager,
            permissions,
        }
    }

    pub fn open(manager: Arc<RepositoriesManager>) -> Self {
        Self::new(manager, Arc::new(AllowAll))
    }

    pub fn manager(&self) -> &Arc<RepositoriesManager> {
        &self.manager
    }

    async fn check(&self, user: &str, action: Action) -> ServerResult<()> {
        if self.permissions.is_permitted(user, &action).await {
            return Ok(());
        }
        warn!(user, %action, "permission denied");
        Err(ServerError::PermissionDenied {
            user: user.to_owned(),
            action: action.to_string(),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> ServerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RepositoriesManager) -> ServerResult<T> + Send + 'static,
    {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || f(&manager))
            .await
            .map_err(|e| ServerError::Internal(format!("repository task failed: {e}")))?
    }

    // -------------------------------------------------------------------
    // Repositories
    // -------------------------------------------------------------------

    pub async fn list_repositories(&self, user: &str) -> ServerResult<BTreeSet<RepositoryId>> {
        let visible = self.blocking(|m| m.repositories()).await?;
        let mut permitted = BTreeSet::new();
        for repository in visible {
            let action = Action::Read {
                repository: repository.clone(),
            };
            if self.permissions.is_permitted(user, &action).await {
                permitted.insert(repository);
            }
        }
        Ok(permitted)
    }

    pub async fn create_repository(
        &self,
        user: &str,
        repository: RepositoryId,
        config: RepositoryConfig,
    ) -> ServerResult<Version> {
        self.check(user, Action::CreateRepository).await?;
        self.blocking(move |m| m.init_repository(&repository, config))
            .await
    }

    pub async fn delete_repository(&self, user: &str, repository: RepositoryId) -> ServerResult<bool> {
        self.check(user, Action::Admin {
            repository: repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.delete_repository(&repository)).await
    }

    // -------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------

    pub async fn list_branches(&self, user: &str, repository: RepositoryId) -> ServerResult<BTreeSet<String>> {
        self.check(user, Action::Read {
            repository: repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.list_branches(&repository)).await
    }

    pub async fn delete_branch(&self, user: &str, branch: BranchReference) -> ServerResult<bool> {
        self.check(user, Action::Admin {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.delete_branch(&branch)).await
    }

    pub async fn head(&self, user: &str, branch: BranchReference) -> ServerResult<Option<Version>> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.head(&branch)).await
    }

    pub async fn push(
        &self,
        user: &str,
        branch: BranchReference,
        version: ObjectHash,
        expected_base: Option<ObjectHash>,
    ) -> ServerResult<Version> {
        self.check(user, Action::Write {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.push(&branch, version, expected_base))
            .await
    }

    pub async fn pull(
        &self,
        user: &str,
        branch: BranchReference,
        known: Option<ObjectHash>,
        filter: DeltaFilter,
    ) -> ServerResult<Pulled> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.pull(&branch, known, filter)).await
    }

    pub async fn revert_to(
        &self,
        user: &str,
        branch: BranchReference,
        target: ObjectHash,
    ) -> ServerResult<Version> {
        self.check(user, Action::Write {
            repository: branch.repository.clone(),
        })
        .await?;
        let author = user.to_owned();
        self.blocking(move |m| m.revert_to(&branch, target, Some(author)))
            .await
    }

    /// Long poll: resolves once the head differs from `known` or after
    /// `timeout`.
    pub async fn poll(
        &self,
        user: &str,
        branch: BranchReference,
        known: Option<ObjectHash>,
        timeout: Duration,
    ) -> ServerResult<Option<ObjectHash>> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| m.wait_for_change(&branch, known, timeout))
            .await
    }

    // -------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------

    pub async fn history(
        &self,
        user: &str,
        branch: BranchReference,
        range: TimeRange,
        skip: usize,
        limit: usize,
    ) -> ServerResult<Vec<HistoryEntry>> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| {
            let Some(head) = m.head(&branch)? else {
                return Ok(Vec::new());
            };
            let graph = m.graph(&branch.repository);
            let page = graph.history(&head).range(range, skip, limit)?;
            Ok(page)
        })
        .await
    }

    pub async fn history_intervals(
        &self,
        user: &str,
        branch: BranchReference,
        range: TimeRange,
        seconds: i64,
        skip: usize,
        limit: usize,
    ) -> ServerResult<Vec<HistoryInterval>> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| {
            let Some(head) = m.head(&branch)? else {
                return Ok(Vec::new());
            };
            let graph = m.graph(&branch.repository);
            let page = graph.history(&head).intervals(range, seconds, skip, limit)?;
            Ok(page)
        })
        .await
    }

    pub async fn history_sessions(
        &self,
        user: &str,
        branch: BranchReference,
        range: TimeRange,
        idle_gap: i64,
        skip: usize,
        limit: usize,
    ) -> ServerResult<Vec<HistoryInterval>> {
        self.check(user, Action::Read {
            repository: branch.repository.clone(),
        })
        .await?;
        self.blocking(move |m| {
            let Some(head) = m.head(&branch)? else {
                return Ok(Vec::new());
            };
            let graph = m.graph(&branch.repository);
            let page = graph.history(&head).sessions(range, idle_gap, skip, limit)?;
            Ok(page)
        })
        .await
    }
}

impl fmt::Debug for ModelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelService")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ReadOnlyExcept;
    use crate::config::ServerConfig;
    use crate::manager::CommitInfo;
    use arbor_types::{IdGenerator, NodeId};

    fn repo() -> RepositoryId {
        RepositoryId::new("models").unwrap()
    }

    fn master() -> BranchReference {
        BranchReference::new(repo(), "master")
    }

    fn service(permissions: Arc<dyn PermissionCheck>) -> ModelService {
        let manager = Arc::new(RepositoriesManager::in_memory(ServerConfig::default()));
        ModelService::new(manager, permissions)
    }

    // ---- permissions ----

    #[tokio::test]
    async fn denied_actions_never_reach_the_store() {
        let svc = service(Arc::new(ReadOnlyExcept::new(["alice"])));
        let err = svc
            .create_repository("bob", repo(), RepositoryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PermissionDenied { ref user, .. } if user == "bob"));
        assert!(svc.manager().repositories().unwrap().is_empty());

        svc.create_repository("alice", repo(), RepositoryConfig::default())
            .await
            .unwrap();
        assert!(svc.head("bob", master()).await.unwrap().is_some());
        let denied = svc.delete_branch("bob", master()).await;
        assert!(matches!(denied, Err(ServerError::PermissionDenied { .. })));
        assert!(svc.delete_branch("alice", master()).await.unwrap());
    }

    #[tokio::test]
    async fn listing_hides_unreadable_repositories() {
        struct OnlyModels;

        #[async_trait::async_trait]
        impl PermissionCheck for OnlyModels {
            async fn is_permitted(&self, _user: &str, action: &Action) -> bool {
                match action {
                    Action::Read { repository } => repository.as_str() == "models",
                    _ => true,
                }
            }
        }

        let svc = service(Arc::new(OnlyModels));
        for id in ["models", "secret"] {
            svc.create_repository("u", RepositoryId::new(id).unwrap(), RepositoryConfig::default())
                .await
                .unwrap();
        }
        assert_eq!(svc.list_repositories("u").await.unwrap(), BTreeSet::from([repo()]));
    }

    // ---- push / pull ----

    #[tokio::test]
    async fn push_pull_and_history() {
        let svc = service(Arc::new(AllowAll));
        let initial = svc
            .create_repository("u", repo(), RepositoryConfig::default())
            .await
            .unwrap();
        let ids = IdGenerator::new(7).unwrap();
        let child = ids.next_node_id().unwrap();
        let v = svc
            .manager()
            .create_version(
                &repo(),
                &initial,
                &ids,
                CommitInfo::at(Some("u".into()), initial.time().saturating_add_secs(1)),
                |t| t.add_child_last(NodeId::ROOT, "children", child, None),
            )
            .unwrap();
        let head = svc
            .push("u", master(), v.hash(), Some(initial.hash()))
            .await
            .unwrap();
        assert_eq!(head, v);

        let pulled = svc
            .pull("u", master(), Some(initial.hash()), DeltaFilter::ALL)
            .await
            .unwrap();
        assert_eq!(pulled.version, v);
        assert!(pulled.delta.objects.contains_key(&v.hash()));

        let entries = svc
            .history("u", master(), TimeRange::unbounded(), 0, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, v.hash());

        let intervals = svc
            .history_intervals("u", master(), TimeRange::unbounded(), i64::MAX, 0, 10)
            .await
            .unwrap();
        assert_eq!(intervals.iter().map(|i| i.size).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn poll_reports_the_current_head() {
        let svc = service(Arc::new(AllowAll));
        let initial = svc
            .create_repository("u", repo(), RepositoryConfig::default())
            .await
            .unwrap();
        let head = svc
            .poll("u", master(), None, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(head, Some(initial.hash()));
        let unchanged = svc
            .poll("u", master(), Some(initial.hash()), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(unchanged, Some(initial.hash()));
    }

    #[tokio::test]
    async fn history_of_a_missing_branch_is_empty() {
        let svc = service(Arc::new(AllowAll));
        svc.create_repository("u", repo(), RepositoryConfig::default())
            .await
            .unwrap();
        let missing = BranchReference::new(repo(), "nope");
        let entries = svc
            .history("u", missing, TimeRange::unbounded(), 0, 10)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
