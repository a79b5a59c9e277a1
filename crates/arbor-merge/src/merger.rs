//! Reconciling two versions that diverged from a common base.
//!
//! Merging does not look at the two final trees. It collects every regular
//! (non-merge) version recorded on either side since the common base,
//! orders them deterministically, captures the intent of each version's
//! operations against the tree they were recorded on, and replays those
//! intents on the base tree. Because the order depends only on the set of
//! versions, merging `a` into `b` and `b` into `a` yields the same tree.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, Level};

use arbor_dag::{NewVersion, ReadyOrder, Version, VersionGraph};
use arbor_ops::{capture_intents, diff, replay_intents, Operation, OperationIntent};
use arbor_types::{IdGenerator, ObjectHash};

use crate::error::{MergeError, MergeResult};

/// Which side wins when concurrent versions write the same property or
/// reference. The winner is the version replayed last.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    HigherVersionWins,
    LowerVersionWins,
}

impl ConflictPolicy {
    fn ready_order(self) -> ReadyOrder {
        match self {
            Self::HigherVersionWins => ReadyOrder::SmallestIdFirst,
            Self::LowerVersionWins => ReadyOrder::LargestIdFirst,
        }
    }
}

pub struct VersionMerger<'a> {
    graph: &'a VersionGraph,
    ids: &'a IdGenerator,
    policy: ConflictPolicy,
}

impl<'a> VersionMerger<'a> {
    pub fn new(graph: &'a VersionGraph, ids: &'a IdGenerator) -> Self {
        Self {
            graph,
            ids,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Merge `incoming` into `current`.
    ///
    /// Returns `current` if it already contains `incoming`, `incoming` if it
    /// contains `current`, and otherwise a new merge version whose base is
    /// `current` and whose merged version is `incoming`.
    pub fn merge_change(&self, current: &Version, incoming: &Version) -> MergeResult<Version> {
        if current.hash() == incoming.hash() || self.graph.is_ancestor(incoming, current)? {
            return Ok(current.clone());
        }
        if self.graph.is_ancestor(current, incoming)? {
            return Ok(incoming.clone());
        }

        let base = self
            .graph
            .common_base_version(current, incoming)?
            .ok_or(MergeError::IncompatibleHistory {
                current: current.hash(),
                incoming: incoming.hash(),
            })?;
        // The first capture on each side loads the base again.
        let _base = Pinned::new(self.graph, &base);

        // Both sides may have performed the same merge. Picking one stops
        // replicas from merging each other's merges forever.
        if self.graph.latest_non_merges(current)? == self.graph.latest_non_merges(incoming)? {
            let pick = if current.id() < incoming.id() {
                current
            } else {
                incoming
            };
            debug!(version = %pick.hash().short_hex(), "sides contain the same changes");
            return Ok(pick.clone());
        }

        let versions =
            self.graph
                .linear_history(Some(&base), &[current, incoming], self.policy.ready_order())?;
        if tracing::enabled!(Level::DEBUG) {
            let conflicts = self.conflicting_operations(&base, current, incoming)?;
            debug!(conflicts, policy = ?self.policy, "operations resolved by policy");
        }
        let mut intents = Vec::new();
        for version in &versions {
            intents.extend(self.capture(version)?);
        }

        let (tree, applied) = replay_intents(&intents, &self.graph.tree(&base), self.graph)?;
        trace!(captured = intents.len(), applied = applied.len(), "replayed intents");

        let operations = diff(&self.graph.tree(current), &tree)?;
        let merged = self.graph.create_version(NewVersion {
            id: self.ids.next_version_id()?,
            tree: &tree,
            base: Some(current),
            merged: Some(incoming),
            operations,
            author: None,
            time: current.time().max(incoming.time()),
        })?;
        debug!(
            current = %current.hash().short_hex(),
            incoming = %incoming.hash().short_hex(),
            base = %base.hash().short_hex(),
            replayed = versions.len(),
            merged = %merged.hash().short_hex(),
            "merged versions"
        );
        Ok(merged)
    }

    /// Operations recorded on `current`'s side since `base` that conflict with
    /// an operation recorded on `incoming`'s side. Versions on both sides are
    /// not concurrent and are skipped.
    fn conflicting_operations(
        &self,
        base: &Version,
        current: &Version,
        incoming: &Version,
    ) -> MergeResult<usize> {
        let order = self.policy.ready_order();
        let ours = self.graph.linear_history(Some(base), &[current], order)?;
        let theirs = self.graph.linear_history(Some(base), &[incoming], order)?;
        let shared: HashSet<ObjectHash> = ours
            .iter()
            .map(Version::hash)
            .filter(|h| theirs.iter().any(|v| v.hash() == *h))
            .collect();
        let operations = |side: &[Version]| -> MergeResult<Vec<Operation>> {
            let mut all = Vec::new();
            for version in side.iter().filter(|v| !shared.contains(&v.hash())) {
                all.extend(self.graph.operations(version)?);
            }
            Ok(all)
        };
        let (ours, theirs) = (operations(ours.as_slice())?, operations(theirs.as_slice())?);
        Ok(ours
            .iter()
            .filter(|a| theirs.iter().any(|b| a.conflicts_with(b)))
            .count())
    }

    /// Intents of a regular version's operations, captured against its
    /// base's tree.
    fn capture(&self, version: &Version) -> MergeResult<Vec<OperationIntent>> {
        let operations = self.graph.operations(version)?;
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let base = self
            .graph
            .base(version)?
            .ok_or(MergeError::MissingBase(version.hash()))?;
        Ok(capture_intents(&operations, &self.graph.tree(&base), self.graph)?)
    }
}

/// Keeps a version pinned in the graph's cache while alive.
struct Pinned<'a> {
    graph: &'a VersionGraph,
    hash: ObjectHash,
}

impl<'a> Pinned<'a> {
    fn new(graph: &'a VersionGraph, version: &Version) -> Self {
        graph.pin(version);
        Self {
            graph,
            hash: version.hash(),
        }
    }
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        self.graph.unpin(&self.hash);
    }
}

impl std::fmt::Debug for VersionMerger<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionMerger")
            .field("policy", &self.policy)
            .finish()
    }
}
