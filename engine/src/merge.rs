//! Last-writer-wins merge of one incoming object against the stored one.
//!
//! This is the core of determinism. The decision depends only on the two
//! revisions, so every replica that has seen the same set of versions ends up
//! holding the same one, whatever order they arrived in.
//!
//! # Rule
//!
//! 1. Higher `version` wins
//! 2. Equal versions: later `last_modified` wins
//! 3. Equal revisions: the existing value is kept

use crate::SyncableObject;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Why an incoming object did not replace the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepReason {
    /// The incoming revision is older
    Stale,
    /// Same revision and same payload
    Duplicate,
    /// Same revision, different payload; receiver keeps its own
    Tie,
}

/// Result of comparing an incoming object with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeDecision {
    /// Nothing stored yet
    Insert,
    /// Incoming revision supersedes the stored one
    Replace,
    /// Stored object stays
    KeepExisting(KeepReason),
}

impl MergeDecision {
    /// Whether the incoming object should be written.
    pub fn writes(&self) -> bool {
        matches!(self, MergeDecision::Insert | MergeDecision::Replace)
    }
}

/// Decide what to do with `incoming` given the currently stored object.
pub fn decide(existing: Option<&SyncableObject>, incoming: &SyncableObject) -> MergeDecision {
    let Some(existing) = existing else {
        return MergeDecision::Insert;
    };

    match incoming.revision().cmp(&existing.revision()) {
        Ordering::Greater => MergeDecision::Replace,
        Ordering::Less => MergeDecision::KeepExisting(KeepReason::Stale),
        Ordering::Equal if incoming.fields == existing.fields => {
            MergeDecision::KeepExisting(KeepReason::Duplicate)
        }
        Ordering::Equal => MergeDecision::KeepExisting(KeepReason::Tie),
    }
}

/// Fold a sequence of versions of one object into the winner.
///
/// Equivalent to applying them one by one to an empty store.
pub fn resolve<'a, I>(candidates: I) -> Option<&'a SyncableObject>
where
    I: IntoIterator<Item = &'a SyncableObject>,
{
    candidates.into_iter().fold(None, |current, incoming| {
        if decide(current, incoming).writes() {
            Some(incoming)
        } else {
            current
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    fn obj(version: u64, ts: u64, scheme: &str) -> SyncableObject {
        SyncableObject::new("theme", "t1", fields! { "colorScheme" => scheme }, ts)
            .with_revision(version, ts)
    }

    #[test]
    fn insert_when_absent() {
        assert_eq!(decide(None, &obj(1, 1, "green")), MergeDecision::Insert);
    }

    #[test]
    fn higher_version_wins_regardless_of_time() {
        let stored = obj(2, 9000, "green");
        let incoming = obj(3, 1000, "purple");
        assert_eq!(decide(Some(&stored), &incoming), MergeDecision::Replace);
        assert_eq!(
            decide(Some(&incoming), &stored),
            MergeDecision::KeepExisting(KeepReason::Stale)
        );
    }

    #[test]
    fn equal_version_later_timestamp_wins() {
        let stored = obj(2, 1000, "green");
        let incoming = obj(2, 2000, "purple");
        assert_eq!(decide(Some(&stored), &incoming), MergeDecision::Replace);
    }

    #[test]
    fn identical_is_duplicate() {
        let stored = obj(2, 1000, "green");
        assert_eq!(
            decide(Some(&stored), &stored.clone()),
            MergeDecision::KeepExisting(KeepReason::Duplicate)
        );
    }

    #[test]
    fn full_tie_keeps_existing() {
        let stored = obj(2, 1000, "green");
        let incoming = obj(2, 1000, "purple");
        let decision = decide(Some(&stored), &incoming);
        assert_eq!(decision, MergeDecision::KeepExisting(KeepReason::Tie));
        assert!(!decision.writes());
    }

    #[test]
    fn resolve_picks_highest_revision() {
        let versions = [obj(1, 10, "a"), obj(3, 5, "c"), obj(2, 50, "b")];
        let winner = resolve(versions.iter()).unwrap();
        assert_eq!(winner.version, 3);
        assert!(resolve(std::iter::empty()).is_none());
    }
}
