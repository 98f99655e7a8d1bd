use std::collections::HashMap;

use crate::backstack::Backstack;
use crate::instance::{Instance, InstanceId};
use crate::operation::Primitive;

/// What happens to an instance when a backstack is reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeState {
    /// Present before and after.
    Retained,
    /// Only present in the target.
    Entering,
    /// Only present in the old backstack; it is closed.
    Exiting,
}

#[derive(Clone, Debug)]
pub struct MergeEntry {
    pub instance: Instance,
    pub state: MergeState,
}

/// The outcome of [`merge`].
///
/// `entries` holds every instance of both backstacks in merged order: target
/// instances in target order, each followed by the old-only instances that
/// trailed it in the old backstack.
#[derive(Clone, Debug)]
pub struct Reconciliation {
    entries: Vec<MergeEntry>,
    survivors: Vec<InstanceId>,
    target: Backstack,
}

/// Reconciles `old` against `target` in a single pass.
///
/// Every target index seeds a bucket. The old backstack is walked once while
/// tracking the highest target index reached so far (it never decreases).
/// Shared instances only move that anchor, they already live in their own
/// seed bucket. Old-only instances are appended to the anchor's bucket, or to
/// a leading bucket when no anchor has been reached yet, and are marked as
/// exiting. Concatenating the buckets yields the merged order.
///
/// Only "append after the last matched anchor" is supported, arbitrary
/// interleavings are not reconstructed.
pub fn merge(old: &Backstack, target: &Backstack) -> Reconciliation {
    let index: HashMap<&InstanceId, usize> = target
        .iter()
        .enumerate()
        .map(|(i, instance)| (instance.id(), i))
        .collect();

    let mut leading = Vec::new();
    let mut buckets: Vec<Vec<MergeEntry>> = target
        .iter()
        .map(|instance| {
            let state = match old.contains(instance.id()) {
                true => MergeState::Retained,
                false => MergeState::Entering,
            };
            vec![MergeEntry {
                instance: instance.clone(),
                state,
            }]
        })
        .collect();

    let mut anchor: Option<usize> = None;
    let mut survivors = Vec::new();

    for instance in old {
        match index.get(instance.id()) {
            Some(&i) => {
                anchor = Some(anchor.map_or(i, |current| current.max(i)));
                survivors.push(instance.id().clone());
            }
            None => {
                let entry = MergeEntry {
                    instance: instance.clone(),
                    state: MergeState::Exiting,
                };
                match anchor {
                    Some(i) => buckets[i].push(entry),
                    None => leading.push(entry),
                }
            }
        }
    }

    let entries = leading
        .into_iter()
        .chain(buckets.into_iter().flatten())
        .collect();

    Reconciliation {
        entries,
        survivors,
        target: target.clone(),
    }
}

impl Reconciliation {
    /// Every instance of both backstacks, in merged order.
    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    /// The reconciled backstack: the non-exiting entries, which is the
    /// target in target order.
    pub fn backstack(&self) -> &Backstack {
        &self.target
    }

    pub fn exiting(&self) -> impl Iterator<Item = &Instance> {
        self.entries
            .iter()
            .filter(|entry| entry.state == MergeState::Exiting)
            .map(|entry| &entry.instance)
    }

    pub fn entering(&self) -> impl Iterator<Item = &Instance> {
        self.entries
            .iter()
            .filter(|entry| entry.state == MergeState::Entering)
            .map(|entry| &entry.instance)
    }

    /// Primitives which turn the old backstack into the target.
    ///
    /// Exiting instances are closed in merged order. Target instances are
    /// then opened from the first position where the surviving old order
    /// stops matching the target; opening an instance that is already
    /// present moves it to the top, so the tail ends up in target order.
    pub fn operations(&self) -> Vec<Primitive> {
        let mut operations: Vec<Primitive> = self
            .exiting()
            .cloned()
            .map(Primitive::Close)
            .collect();

        let prefix = self
            .survivors
            .iter()
            .zip(self.target.iter())
            .take_while(|(survivor, instance)| *survivor == instance.id())
            .count();

        operations.extend(
            self.target
                .iter()
                .skip(prefix)
                .cloned()
                .map(Primitive::Open),
        );

        operations
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backstack::tests::{names, screen};

    fn merged_names(reconciliation: &Reconciliation) -> Vec<(&'static str, MergeState)> {
        reconciliation
            .entries()
            .iter()
            .map(|entry| {
                let name = entry
                    .instance
                    .key_as::<crate::backstack::tests::Screen>()
                    .map_or("?", |screen| screen.0);
                (name, entry.state)
            })
            .collect()
    }

    fn apply(backstack: &Backstack, operations: Vec<Primitive>) -> Backstack {
        let mut backstack = backstack.clone();
        for operation in operations {
            match operation {
                Primitive::Open(instance) => backstack.open(instance),
                Primitive::Close(instance) => {
                    backstack.close(instance.id());
                }
                _ => unreachable!(),
            }
        }
        backstack
    }

    #[test]
    fn test_merge_drops_tail_after_anchor() {
        let (a, b, c) = (screen("A"), screen("B"), screen("C"));
        let old = Backstack::from(vec![a.clone(), b, c]);
        let target = Backstack::from(vec![a]);

        let reconciliation = merge(&old, &target);

        assert_eq!(names(reconciliation.backstack()), vec!["A"]);
        assert_eq!(
            merged_names(&reconciliation),
            vec![
                ("A", MergeState::Retained),
                ("B", MergeState::Exiting),
                ("C", MergeState::Exiting),
            ]
        );
        assert_eq!(names(&apply(&old, reconciliation.operations())), vec!["A"]);
    }

    #[test]
    fn test_merge_with_itself_is_identity() {
        let old = Backstack::from(vec![screen("A"), screen("B"), screen("C")]);

        let reconciliation = merge(&old, &old);

        assert_eq!(reconciliation.backstack(), &old);
        assert!(reconciliation.operations().is_empty());
        assert!(
            reconciliation
                .entries()
                .iter()
                .all(|entry| entry.state == MergeState::Retained)
        );
    }

    #[test]
    fn test_merge_keeps_target_order() {
        let (a, b, c, d) = (screen("A"), screen("B"), screen("C"), screen("D"));
        let old = Backstack::from(vec![a.clone(), b, c.clone()]);
        let target = Backstack::from(vec![c, d, a]);

        let reconciliation = merge(&old, &target);

        // A anchors at the last target index, so B trails it as exiting.
        assert_eq!(
            merged_names(&reconciliation),
            vec![
                ("C", MergeState::Retained),
                ("D", MergeState::Entering),
                ("A", MergeState::Retained),
                ("B", MergeState::Exiting),
            ]
        );
        assert_eq!(
            names(&apply(&old, reconciliation.operations())),
            vec!["C", "D", "A"]
        );
        assert_eq!(reconciliation.entering().count(), 1);
    }

    #[test]
    fn test_old_only_elements_follow_their_anchor() {
        let (a, b, c, d, e) = (screen("A"), screen("B"), screen("C"), screen("D"), screen("E"));
        let old = Backstack::from(vec![a.clone(), b, c.clone(), d]);
        let target = Backstack::from(vec![a, c, e]);

        let reconciliation = merge(&old, &target);

        assert_eq!(
            merged_names(&reconciliation),
            vec![
                ("A", MergeState::Retained),
                ("B", MergeState::Exiting),
                ("C", MergeState::Retained),
                ("D", MergeState::Exiting),
                ("E", MergeState::Entering),
            ]
        );
        assert_eq!(
            names(&apply(&old, reconciliation.operations())),
            vec!["A", "C", "E"]
        );
    }

    #[test]
    fn test_old_only_elements_before_any_anchor_lead() {
        let (a, b, x) = (screen("A"), screen("B"), screen("X"));
        let old = Backstack::from(vec![x, a.clone()]);
        let target = Backstack::from(vec![a, b]);

        let reconciliation = merge(&old, &target);

        assert_eq!(
            merged_names(&reconciliation),
            vec![
                ("X", MergeState::Exiting),
                ("A", MergeState::Retained),
                ("B", MergeState::Entering),
            ]
        );
    }

    #[test]
    fn test_anchor_never_moves_backward() {
        let (a, b, x) = (screen("A"), screen("B"), screen("X"));
        let old = Backstack::from(vec![a.clone(), b.clone(), x]);
        let target = Backstack::from(vec![b, a]);

        let reconciliation = merge(&old, &target);

        // A anchors at index 1, B (index 0) can't pull the anchor back, so X
        // trails A rather than B.
        assert_eq!(
            merged_names(&reconciliation),
            vec![
                ("B", MergeState::Retained),
                ("A", MergeState::Retained),
                ("X", MergeState::Exiting),
            ]
        );
        assert_eq!(
            names(&apply(&old, reconciliation.operations())),
            vec!["B", "A"]
        );
    }
}
