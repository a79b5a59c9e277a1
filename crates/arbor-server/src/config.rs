use std::path::Path;

use serde::{Deserialize, Serialize};

use arbor_dag::GraphConfig;
use arbor_merge::ConflictPolicy;
use arbor_refs::BranchKeys;
use arbor_types::Timestamp;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Merge-and-retry rounds before a push gives up with a conflict.
    pub max_push_retries: usize,
    /// Hashes fetched per store round trip during delta computation and
    /// version graph walks.
    pub bulk_batch_size: usize,
    /// Decoded objects kept in memory per repository.
    pub cache_capacity: usize,
    /// Key layout of new repositories.
    pub branch_keys: BranchKeys,
    pub default_branch: String,
    pub inline_operations_limit: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_push_retries: 32,
            bulk_batch_size: 5000,
            cache_capacity: 100_000,
            branch_keys: BranchKeys::Isolated,
            default_branch: "master".into(),
            inline_operations_limit: 16,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            cache_capacity: self.cache_capacity,
            version_batch_size: self.bulk_batch_size,
            inline_operations_limit: self.inline_operations_limit,
            ..GraphConfig::default()
        }
    }
}

/// Settings for a new repository. Unset fields fall back to the server
/// configuration or the current time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub initial_branch: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<Timestamp>,
    pub branch_keys: Option<BranchKeys>,
}
