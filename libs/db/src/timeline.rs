//! Append-only, time-ordered mutation log.
//!
//! Entries are ordered by `(timestamp, sequence)`: the sequence number is
//! assigned at append time, so timestamp ties resolve to arrival order.
//! A `Timeline` is a cheap snapshot (`Arc`-shared); appending copies the
//! entry vector only when another snapshot still holds it.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::clock::Timestamp;
use crate::mutation::{Mutation, MutationKind, Timestamped};
use crate::visibility::Authorizations;

/// A mutation plus its arrival sequence within the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<M> {
    pub seq: u64,
    pub mutation: M,
}

#[derive(Debug, Clone)]
pub struct Timeline<M> {
    entries: Arc<Vec<Sequenced<M>>>,
    next_seq: u64,
}

impl<M> Default for Timeline<M> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            next_seq: 0,
        }
    }
}

impl<M: Timestamped + Clone> Timeline<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from mutations in arrival order (e.g. decoded cells).
    pub fn from_mutations(mutations: impl IntoIterator<Item = M>) -> Self {
        let mut timeline = Self::new();
        timeline.extend(mutations);
        timeline
    }

    /// Ordered insert; O(1) amortized when timestamps arrive non-decreasing.
    pub fn append(&mut self, mutation: M) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let ts = mutation.timestamp();
        let entries = Arc::make_mut(&mut self.entries);
        let at = if entries.last().map_or(true, |e| e.mutation.timestamp() <= ts) {
            entries.len()
        } else {
            entries.partition_point(|e| e.mutation.timestamp() <= ts)
        };
        entries.insert(at, Sequenced { seq, mutation });
    }

    pub fn extend(&mut self, mutations: impl IntoIterator<Item = M>) {
        for mutation in mutations {
            self.append(mutation);
        }
    }
}

impl<M: Timestamped> Timeline<M> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Sequenced<M>] {
        &self.entries
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &M> {
        self.entries.iter().map(|e| &e.mutation)
    }

    /// Mutations with `timestamp <= cutoff` (all of them when `cutoff` is None).
    pub fn as_of(&self, cutoff: Option<Timestamp>) -> impl Iterator<Item = &M> {
        let end = match cutoff {
            None => self.entries.len(),
            Some(t) => self.entries.partition_point(|e| e.mutation.timestamp() <= t),
        };
        self.entries[..end].iter().map(|e| &e.mutation)
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.entries.first().map(|e| e.mutation.timestamp())
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.entries.last().map(|e| e.mutation.timestamp())
    }

    pub fn find_last_by(&self, predicate: impl Fn(&M) -> bool) -> Option<&M> {
        self.iter().rev().find(|m| predicate(m))
    }

    pub fn find_all_by<'a>(&'a self, predicate: impl Fn(&M) -> bool + 'a) -> impl Iterator<Item = &'a M> {
        self.iter().filter(move |m| predicate(m))
    }
}

impl Timeline<Mutation> {
    pub fn find_last(&self, kind: MutationKind) -> Option<&Mutation> {
        self.find_last_by(|m| m.kind() == kind)
    }

    pub fn find_all(&self, kind: MutationKind) -> impl Iterator<Item = &Mutation> {
        self.find_all_by(move |m| m.kind() == kind)
    }

    /// Additional-visibility labels granted as of `cutoff`.
    pub fn additional_visibilities(&self, cutoff: Option<Timestamp>) -> BTreeSet<String> {
        additional_visibilities(self.as_of(cutoff))
    }

    /// True iff the latest readable SoftDelete / ElementTimestamp up to `cutoff`
    /// is a SoftDelete. A later touch undeletes.
    pub fn is_deleted_as_of(&self, cutoff: Option<Timestamp>, authorizations: &Authorizations) -> bool {
        let granted = authorizations.holds_any(
            self.additional_visibilities(cutoff).iter().map(String::as_str),
        );
        is_deleted(self.as_of(cutoff), |v| granted || authorizations.can_read(v))
    }
}

pub(crate) fn additional_visibilities<'a>(
    mutations: impl Iterator<Item = &'a Mutation>,
) -> BTreeSet<String> {
    let mut labels = BTreeSet::new();
    for mutation in mutations {
        match mutation {
            Mutation::AddAdditionalVisibility(m) => {
                labels.insert(m.label.clone());
            }
            Mutation::DeleteAdditionalVisibility(m) => {
                labels.remove(&m.label);
            }
            _ => {}
        }
    }
    labels
}

pub(crate) fn is_deleted<'a>(
    mutations: impl Iterator<Item = &'a Mutation>,
    readable: impl Fn(&crate::visibility::Visibility) -> bool,
) -> bool {
    let mut deleted = false;
    for mutation in mutations {
        match mutation {
            Mutation::SoftDelete(m) if readable(&m.visibility) => deleted = true,
            Mutation::ElementTimestamp(m) if readable(&m.visibility) => deleted = false,
            _ => {}
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{AdditionalVisibilityChange, ElementTimestamp, SoftDelete};
    use crate::visibility::Visibility;

    fn touch(ts: u64) -> Mutation {
        Mutation::ElementTimestamp(ElementTimestamp {
            timestamp: Timestamp(ts),
            visibility: Visibility::empty(),
        })
    }

    fn soft_delete(ts: u64, vis: &str) -> Mutation {
        Mutation::SoftDelete(SoftDelete {
            timestamp: Timestamp(ts),
            visibility: Visibility::new(vis).unwrap(),
            data: None,
        })
    }

    #[test]
    fn test_out_of_order_append_is_sorted() {
        let mut timeline = Timeline::new();
        timeline.append(touch(5));
        timeline.append(touch(1));
        timeline.append(touch(3));
        let ts: Vec<u64> = timeline.iter().map(|m| m.timestamp().0).collect();
        assert_eq!(ts, vec![1, 3, 5]);
        assert_eq!(timeline.first_timestamp(), Some(Timestamp(1)));
        assert_eq!(timeline.last_timestamp(), Some(Timestamp(5)));
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut timeline = Timeline::new();
        timeline.append(soft_delete(2, ""));
        timeline.append(touch(2));
        timeline.append(touch(1));
        let seqs: Vec<u64> = timeline.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 0, 1]);
        assert!(matches!(
            timeline.find_last(MutationKind::ElementTimestamp),
            Some(Mutation::ElementTimestamp(m)) if m.timestamp == Timestamp(2)
        ));
    }

    #[test]
    fn test_snapshot_is_stable_across_append() {
        let mut timeline = Timeline::new();
        timeline.append(touch(1));
        let snapshot = timeline.clone();
        timeline.append(touch(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_touch_after_soft_delete_undeletes() {
        let auths = Authorizations::empty();
        let timeline = Timeline::from_mutations([touch(1), soft_delete(2, ""), touch(3)]);
        assert!(!timeline.is_deleted_as_of(Some(Timestamp(1)), &auths));
        assert!(timeline.is_deleted_as_of(Some(Timestamp(2)), &auths));
        assert!(!timeline.is_deleted_as_of(None, &auths));
    }

    #[test]
    fn test_soft_delete_respects_visibility() {
        let timeline = Timeline::from_mutations([touch(1), soft_delete(2, "admin")]);
        assert!(!timeline.is_deleted_as_of(None, &Authorizations::empty()));
        assert!(timeline.is_deleted_as_of(None, &Authorizations::new(["admin"])));
    }

    #[test]
    fn test_additional_visibility_fold() {
        let grant = |ts: u64, add: bool| {
            let change = AdditionalVisibilityChange {
                timestamp: Timestamp(ts),
                label: "auditor".into(),
                data: None,
            };
            if add {
                Mutation::AddAdditionalVisibility(change)
            } else {
                Mutation::DeleteAdditionalVisibility(change)
            }
        };
        let timeline = Timeline::from_mutations([grant(1, true), grant(2, false)]);
        assert!(timeline.additional_visibilities(Some(Timestamp(1))).contains("auditor"));
        assert!(timeline.additional_visibilities(None).is_empty());
        assert_eq!(timeline.find_all(MutationKind::AddAdditionalVisibility).count(), 1);
    }
}
