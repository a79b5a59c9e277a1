use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use arbor_types::{ObjectHash, Timestamp, VersionId};

use crate::error::DagResult;
use crate::graph::VersionGraph;
use crate::version::Version;

/// Reverse-chronological history behind a head version.
///
/// Every call to [`iter`](Self::iter) starts a new walk. Versions reachable
/// through both base and merged pointers are produced once. Ties in time are
/// broken by version id, newest id first.
pub struct History<'g> {
    graph: &'g VersionGraph,
    head: Version,
}

impl<'g> History<'g> {
    pub(crate) fn new(graph: &'g VersionGraph, head: Version) -> Self {
        Self { graph, head }
    }

    pub fn head(&self) -> &Version {
        &self.head
    }

    pub fn iter(&self) -> HistoryIter<'g> {
        let mut heap = BinaryHeap::new();
        heap.push(ByTime(self.head.clone()));
        HistoryIter {
            graph: self.graph,
            heap,
            seen: HashSet::from([self.head.hash()]),
            expand: None,
            failed: false,
        }
    }
}

impl<'g> IntoIterator for &History<'g> {
    type Item = DagResult<Version>;
    type IntoIter = HistoryIter<'g>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Parents are loaded only when the walk moves past their child, both in one
/// batched read. The first load failure is yielded and ends the walk.
pub struct HistoryIter<'g> {
    graph: &'g VersionGraph,
    heap: BinaryHeap<ByTime>,
    seen: HashSet<ObjectHash>,
    expand: Option<Version>,
    failed: bool,
}

impl Iterator for HistoryIter<'_> {
    type Item = DagResult<Version>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(previous) = self.expand.take() {
            let parents: Vec<ObjectHash> = previous
                .parent_hashes()
                .filter(|p| self.seen.insert(*p))
                .collect();
            match self.graph.load_all(&parents) {
                Ok(versions) => self.heap.extend(versions.into_iter().map(ByTime)),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let ByTime(version) = self.heap.pop()?;
        self.expand = Some(version.clone());
        Some(Ok(version))
    }
}

struct ByTime(Version);

impl ByTime {
    fn key(&self) -> (Timestamp, VersionId, ObjectHash) {
        (self.0.time(), self.0.id(), self.0.hash())
    }
}

impl PartialEq for ByTime {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ByTime {}

impl PartialOrd for ByTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
