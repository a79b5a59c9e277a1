//! Branch references for arbor.
//!
//! A branch is a named, mutable pointer to the head version of a line of
//! development. Heads are the only mutable cells of a repository; they are
//! stored as key/value entries and changed inside transactions, normally
//! through the compare-and-set used by push.
//!
//! # Modules
//!
//! - [`error`] -- error types for reference operations
//! - [`types`] -- the [`BranchKeys`] key layout (isolated or legacy global)
//! - [`branches`] -- [`BranchStore`]: heads, repository and branch lists
//! - [`names`] -- branch name and repository id validation

pub mod branches;
pub mod error;
pub mod names;
pub mod types;

pub use branches::BranchStore;
pub use error::{RefError, RefResult};
pub use names::{validate_branch_name, validate_repository_id};
pub use types::BranchKeys;
