//! History queries: paging, fixed-size time intervals and sessions.
//!
//! All queries are folds over the lazy [`History`] sequence and stop reading
//! versions as soon as the requested page is complete.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use arbor_types::{ObjectHash, TimeRange, Timestamp, VersionId};

use crate::error::{DagError, DagResult};
use crate::history::History;
use crate::version::Version;

/// One version as shown in a history listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: ObjectHash,
    pub id: VersionId,
    pub time: Timestamp,
    pub author: Option<String>,
}

impl From<&Version> for HistoryEntry {
    fn from(version: &Version) -> Self {
        Self {
            version: version.hash(),
            id: version.id(),
            time: version.time(),
            author: version.author().map(str::to_owned),
        }
    }
}

/// A group of consecutive history entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryInterval {
    /// Oldest version of the group.
    pub first_version: ObjectHash,
    /// Newest version of the group.
    pub last_version: ObjectHash,
    pub size: usize,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub authors: BTreeSet<String>,
}

impl HistoryInterval {
    fn start(entry: &HistoryEntry) -> Self {
        Self {
            first_version: entry.version,
            last_version: entry.version,
            size: 1,
            min_time: entry.time,
            max_time: entry.time,
            authors: entry.author.iter().cloned().collect(),
        }
    }

    /// Add an entry that is older than every entry so far.
    fn push(&mut self, entry: &HistoryEntry) {
        self.first_version = entry.version;
        self.size += 1;
        self.min_time = self.min_time.min(entry.time);
        self.max_time = self.max_time.max(entry.time);
        if let Some(author) = &entry.author {
            self.authors.insert(author.clone());
        }
    }
}

impl<'g> History<'g> {
    /// Entries whose time lies in `range`, newest first.
    pub fn entries(&self, range: TimeRange) -> impl Iterator<Item = DagResult<HistoryEntry>> + 'g {
        self.iter()
            .map(|v| v.map(|v| HistoryEntry::from(&v)))
            .take_while(move |e| e.as_ref().map_or(true, |e| !range.is_before_start(e.time)))
            .filter(move |e| e.as_ref().map_or(true, |e| range.contains(e.time)))
    }

    /// One page of entries.
    pub fn range(&self, range: TimeRange, skip: usize, limit: usize) -> DagResult<Vec<HistoryEntry>> {
        self.entries(range).skip(skip).take(limit).collect()
    }

    /// Groups of entries falling into the same `seconds`-wide bucket of the
    /// UNIX time line.
    pub fn intervals(
        &self,
        range: TimeRange,
        seconds: i64,
        skip: usize,
        limit: usize,
    ) -> DagResult<Vec<HistoryInterval>> {
        if seconds <= 0 {
            return Err(DagError::InvalidQuery(format!(
                "interval length must be positive, got {seconds}"
            )));
        }
        let bucket = |t: Timestamp| t.as_secs().div_euclid(seconds);
        group(
            self.entries(range),
            |current, entry| bucket(current.min_time) == bucket(entry.time),
            skip,
            limit,
        )
    }

    /// Groups of entries separated by at least `idle_gap` seconds without a
    /// version.
    pub fn sessions(
        &self,
        range: TimeRange,
        idle_gap: i64,
        skip: usize,
        limit: usize,
    ) -> DagResult<Vec<HistoryInterval>> {
        if idle_gap <= 0 {
            return Err(DagError::InvalidQuery(format!(
                "idle gap must be positive, got {idle_gap}"
            )));
        }
        group(
            self.entries(range),
            |current, entry| {
                current.min_time.as_secs().saturating_sub(entry.time.as_secs()) < idle_gap
            },
            skip,
            limit,
        )
    }

    /// Groups split at the given points in time. An entry at exactly a split
    /// point belongs to the group after it.
    pub fn split_at(&self, points: &[Timestamp]) -> DagResult<Vec<HistoryInterval>> {
        let mut points = points.to_vec();
        points.sort();
        points.dedup();
        let segment = |t: Timestamp| points.partition_point(|p| *p <= t);
        group(
            self.entries(TimeRange::unbounded()),
            |current, entry| segment(current.min_time) == segment(entry.time),
            0,
            usize::MAX,
        )
    }
}

/// Fold entries into groups and return one page of them. Reading stops as
/// soon as the page's last group is known to be complete.
fn group<I, F>(entries: I, mut same: F, skip: usize, limit: usize) -> DagResult<Vec<HistoryInterval>>
where
    I: Iterator<Item = DagResult<HistoryEntry>>,
    F: FnMut(&HistoryInterval, &HistoryEntry) -> bool,
{
    let mut page = Vec::new();
    if limit == 0 {
        return Ok(page);
    }
    let mut index = 0usize;
    let mut current: Option<HistoryInterval> = None;
    for entry in entries {
        let entry = entry?;
        if let Some(interval) = current.as_mut() {
            if same(interval, &entry) {
                interval.push(&entry);
                continue;
            }
        }
        if let Some(done) = current.replace(HistoryInterval::start(&entry)) {
            if index >= skip {
                page.push(done);
                if page.len() == limit {
                    return Ok(page);
                }
            }
            index += 1;
        }
    }
    if let Some(done) = current {
        if index >= skip {
            page.push(done);
        }
    }
    Ok(page)
}
