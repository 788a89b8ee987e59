//! Revision ordering for last-writer-wins resolution.
//!
//! A revision is the `(version, last_modified)` pair of an object. Revisions
//! are totally ordered, which is what makes the merge deterministic.

use crate::{Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The edit position of an object.
///
/// Ordering rules:
/// 1. Higher version wins
/// 2. If versions are equal, later `last_modified` wins
///
/// Equal revisions compare equal; the merge layer keeps the existing value in
/// that case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Per-object edit counter, starting at 1
    pub version: Version,
    /// Wall-clock milliseconds of the last local mutation
    pub last_modified: Timestamp,
}

impl Revision {
    /// The first revision of a new object.
    pub fn initial(timestamp: Timestamp) -> Self {
        Self {
            version: 1,
            last_modified: timestamp,
        }
    }

    /// Create a revision with explicit values.
    pub fn new(version: Version, last_modified: Timestamp) -> Self {
        Self {
            version,
            last_modified,
        }
    }

    /// The revision following this one for a local edit made at `timestamp`.
    ///
    /// The timestamp never moves backwards even if the wall clock does.
    pub fn next(&self, timestamp: Timestamp) -> Self {
        Self {
            version: self.version.saturating_add(1),
            last_modified: timestamp.max(self.last_modified),
        }
    }

    /// Whether this revision strictly supersedes `other`.
    pub fn supersedes(&self, other: &Revision) -> bool {
        self > other
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.version.cmp(&other.version) {
            Ordering::Equal => self.last_modified.cmp(&other.last_modified),
            other => other,
        }
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}@{}", self.version, self.last_modified)
    }
}
