//! Key layout of repository and branch records.

use serde::{Deserialize, Serialize};

use arbor_store::{Namespace, StoreKey};
use arbor_types::{BranchReference, RepositoryId};

const KEY_PREFIX: &str = ":v2";

/// Where a repository keeps its branch records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKeys {
    /// Inside the repository's own namespace, removed together with it.
    #[default]
    Isolated,
    /// In the global namespace, keyed by repository id.
    LegacyGlobal,
}

impl BranchKeys {
    pub const ALL: [BranchKeys; 2] = [BranchKeys::Isolated, BranchKeys::LegacyGlobal];

    /// The list of repositories using this layout.
    pub fn repositories_key(self) -> StoreKey {
        let name = match self {
            Self::Isolated => format!("{KEY_PREFIX}:isolated-repositories"),
            Self::LegacyGlobal => format!("{KEY_PREFIX}:repositories"),
        };
        StoreKey::entry(Namespace::Global, name)
    }

    /// The list of branch names of `repository`.
    pub fn branch_list_key(self, repository: &RepositoryId) -> StoreKey {
        match self {
            Self::Isolated => StoreKey::entry(
                Namespace::Repository(repository.clone()),
                format!("{KEY_PREFIX}:branches"),
            ),
            Self::LegacyGlobal => StoreKey::entry(
                Namespace::Global,
                format!("{KEY_PREFIX}:repositories:{repository}:branches"),
            ),
        }
    }

    /// The head pointer of `branch`.
    pub fn head_key(self, branch: &BranchReference) -> StoreKey {
        match self {
            Self::Isolated => StoreKey::entry(
                Namespace::Repository(branch.repository.clone()),
                format!("{KEY_PREFIX}:branches:{}", branch.branch),
            ),
            Self::LegacyGlobal => StoreKey::entry(
                Namespace::Global,
                format!(
                    "{KEY_PREFIX}:repositories:{}:branches:{}",
                    branch.repository, branch.branch
                ),
            ),
        }
    }
}
