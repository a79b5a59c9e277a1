//! Repository hosting for arbor.
//!
//! A [`RepositoriesManager`] keeps any number of repositories in one
//! key/value store. Clients push versions they created locally; when the
//! branch moved in the meantime the server merges and retries instead of
//! rejecting the push. Pulls ship only the objects the client lacks.
//!
//! # Components
//!
//! - [`RepositoriesManager`]: repositories, branches, push, pull, revert
//! - [`ModelService`]: async façade with a [`PermissionCheck`] hook
//! - [`compute_delta`]: reachable-object difference between two versions
//! - [`ServerConfig`]: tuning loaded from TOML

pub mod auth;
pub mod config;
pub mod delta;
pub mod error;
pub mod manager;
pub mod service;

pub use auth::{Action, AllowAll, PermissionCheck, ReadOnlyExcept};
pub use config::{RepositoryConfig, ServerConfig};
pub use delta::{compute_delta, DeltaFilter, ObjectDelta};
pub use error::{ServerError, ServerResult};
pub use manager::{CommitInfo, Pulled, RepositoriesManager};
pub use service::ModelService;
