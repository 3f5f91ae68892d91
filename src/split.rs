//! Split identifiers and the static split-to-worker assignment.
//!
//! A read session hands the engine an ordered list of opaque [`SplitId`]s. Before any
//! worker starts, the engine stripes that list across its `P` workers round-robin:
//! worker `i` owns `splits[i], splits[i + P], splits[i + 2P], …`.
//!
//! The assignment is computed once at open time and never rebalanced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque, immutable name of one independently readable partition of the remote table.
///
/// Cloning is cheap; the name is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitId(Arc<str>);

impl SplitId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SplitId({:?})", &*self.0)
    }
}

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SplitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SplitId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for SplitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The ordered splits owned by one worker for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    /// Index of the owning worker (`0..worker_count`).
    pub worker: usize,
    /// Splits in the order the worker drains them.
    pub splits: Vec<SplitId>,
}

impl WorkerAssignment {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.splits.len()
    }
}

/// Return the splits owned by `worker_index` out of `worker_count` workers.
///
/// Round-robin striping: `splits[i], splits[i + P], …`. An index at or past the split
/// count yields an empty list; that worker simply has nothing to do. A `worker_count`
/// of zero is treated as one.
///
/// The function is pure: the same inputs always produce the same assignment.
///
/// # Example
/// ```
/// use splitflow::split::{assign_splits, SplitId};
///
/// let splits: Vec<SplitId> = ["s0", "s1", "s2", "s3", "s4"].into_iter().map(SplitId::from).collect();
/// let mine = assign_splits(&splits, 2, 0);
/// assert_eq!(mine, vec![SplitId::from("s0"), SplitId::from("s2"), SplitId::from("s4")]);
/// ```
#[must_use]
pub fn assign_splits(splits: &[SplitId], worker_count: usize, worker_index: usize) -> Vec<SplitId> {
    let step = worker_count.max(1);
    splits
        .iter()
        .skip(worker_index)
        .step_by(step)
        .cloned()
        .collect()
}

/// Compute the assignment of every worker at once, indexed by worker.
#[must_use]
pub fn assign_all(splits: &[SplitId], worker_count: usize) -> Vec<WorkerAssignment> {
    let workers = worker_count.max(1);
    (0..workers)
        .map(|worker| WorkerAssignment {
            worker,
            splits: assign_splits(splits, workers, worker),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<SplitId> {
        (0..n).map(|i| SplitId::new(format!("split-{i}"))).collect()
    }

    #[test]
    fn index_past_end_is_empty() {
        assert!(assign_splits(&ids(2), 4, 3).is_empty());
    }

    #[test]
    fn zero_workers_behaves_like_one() {
        let splits = ids(3);
        assert_eq!(assign_splits(&splits, 0, 0), splits);
        assert_eq!(assign_all(&splits, 0).len(), 1);
    }

    #[test]
    fn display_is_the_raw_name() {
        let id = SplitId::from("projects/p/streams/abc");
        assert_eq!(id.to_string(), "projects/p/streams/abc");
        assert_eq!(format!("{id:?}"), "SplitId(\"projects/p/streams/abc\")");
    }
}
