//! Version history for arbor.
//!
//! A [`Version`] is an immutable commit: a tree hash, the version it was
//! based on, for merges the version merged into it, and the operations that
//! turn the base's tree into its own. [`VersionGraph`] stores and loads
//! versions and answers questions about how they relate.
//!
//! # Components
//!
//! - [`VersionGraph`] -- create/load versions, ancestry, common bases,
//!   linear history
//! - [`History`] -- lazy, restartable, reverse-chronological walk
//! - [`HistoryEntry`], [`HistoryInterval`] -- paged listings, time intervals
//!   and sessions

pub mod error;
pub mod graph;
pub mod history;
pub mod queries;
pub mod version;

pub use error::{DagError, DagResult};
pub use graph::{GraphConfig, NewVersion, ReadyOrder, VersionGraph, DEFAULT_VERSION_BATCH};
pub use history::{History, HistoryIter};
pub use queries::{HistoryEntry, HistoryInterval};
pub use version::{OperationList, Version, VersionData, VersionOperations};
