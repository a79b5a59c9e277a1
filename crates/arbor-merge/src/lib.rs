//! Merge engine for arbor.
//!
//! [`VersionMerger::merge_change`] reconciles two versions by replaying the
//! operations recorded on both sides since their common base. Conflicting
//! writes to the same property or reference are settled by a
//! [`ConflictPolicy`] over version ids, so every replica that merges the
//! same two versions computes the same tree.

pub mod error;
pub mod merger;

pub use error::{MergeError, MergeResult};
pub use merger::{ConflictPolicy, VersionMerger};
