//! Edit operations for arbor.
//!
//! A [`WorkingBranch`] records every edit as an [`Operation`]. Operations are
//! the unit of history: a version stores the operations that produce its
//! tree from its base, and merging replays one side's operations on the
//! other side's tree through [`OperationIntent`]s.
//!
//! # Components
//!
//! - [`Operation`] -- closed set of edits with `apply` and conflict checks
//! - [`OperationIntent`] -- an operation plus the context needed to rebase it
//! - [`diff`] -- operations that turn one tree into another
//! - [`WorkingBranch`], [`WriteTransaction`] -- atomic edit scopes

pub mod branch;
pub mod diff;
pub mod error;
pub mod intent;
pub mod operation;

pub use branch::{WorkingBranch, WriteTransaction};
pub use diff::diff;
pub use error::{OpError, OpResult};
pub use intent::{capture_intents, replay_intents, OperationIntent};
pub use operation::{revert_operations, NoVersions, Operation, Position, TreeResolver};
