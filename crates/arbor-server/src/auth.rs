//! The permission hook consulted before branch and repository operations.
//!
//! Token formats and identity providers live outside this crate; a check
//! only sees a user identifier and the requested [`Action`].

use std::fmt;

use async_trait::async_trait;

use arbor_types::RepositoryId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Read { repository: RepositoryId },
    Write { repository: RepositoryId },
    /// Deleting branches or the repository itself.
    Admin { repository: RepositoryId },
    CreateRepository,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { repository } => write!(f, "read:{repository}"),
            Self::Write { repository } => write!(f, "write:{repository}"),
            Self::Admin { repository } => write!(f, "admin:{repository}"),
            Self::CreateRepository => write!(f, "create-repository"),
        }
    }
}

#[async_trait]
pub trait PermissionCheck: Send + Sync {
    async fn is_permitted(&self, user: &str, action: &Action) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl PermissionCheck for AllowAll {
    async fn is_permitted(&self, _user: &str, _action: &Action) -> bool {
        true
    }
}

/// Grants reads to everyone and everything else to the listed users.
pub struct ReadOnlyExcept {
    writers: Vec<String>,
}

impl ReadOnlyExcept {
    pub fn new<I, S>(writers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            writers: writers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PermissionCheck for ReadOnlyExcept {
    async fn is_permitted(&self, user: &str, action: &Action) -> bool {
        matches!(action, Action::Read { .. }) || self.writers.iter().any(|w| w == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryId {
        RepositoryId::new("r").unwrap()
    }

    #[test]
    fn action_display() {
        assert_eq!(Action::Read { repository: repo() }.to_string(), "read:r");
        assert_eq!(Action::CreateRepository.to_string(), "create-repository");
    }

    #[tokio::test]
    async fn allow_all() {
        assert!(AllowAll.is_permitted("anyone", &Action::CreateRepository).await);
    }

    #[tokio::test]
    async fn read_only_except_writers() {
        let check = ReadOnlyExcept::new(["alice"]);
        assert!(check.is_permitted("bob", &Action::Read { repository: repo() }).await);
        assert!(!check.is_permitted("bob", &Action::Write { repository: repo() }).await);
        assert!(check.is_permitted("alice", &Action::Admin { repository: repo() }).await);
    }
}
