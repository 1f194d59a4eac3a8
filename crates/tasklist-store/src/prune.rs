//! Capacity-driven removal of low-value entries.
//!
//! Entries are split into protected ones, which are never removed, and
//! prunable ones, of which the oldest fraction is dropped. When the prunable
//! set is too small to meet the target, pruning stops there: capacity
//! pressure is reported, never resolved by deleting protected data.

use std::collections::HashSet;

/// An entity with an identifier unique within its collection.
pub trait Entity {
    fn id(&self) -> &str;
}

/// Pruning policy of an entity type.
pub trait Prunable: Entity {
    /// Protected entities are never pruned (e.g. incomplete tasks).
    fn is_protected(&self) -> bool;

    /// Sort key for pruning; lower values are pruned first.
    fn age_key(&self) -> u64;
}

/// Outcome of [`prune`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pruned<E> {
    /// Surviving entries, in their original order.
    pub kept: Vec<E>,
    pub removed: usize,
    /// How many removals the fraction asked for.
    pub requested: usize,
}

impl<E> Pruned<E> {
    /// Whether the prunable set ran out before the target was met.
    pub fn exhausted(&self) -> bool {
        self.requested > self.removed
    }
}

/// Number of prunable entries `fraction` asks to remove: `ceil(count * fraction)`.
///
/// A tiny tolerance keeps float noise (`0.1 * 30 = 3.0000000000000004`) from
/// rounding one entry too far.
pub fn prune_count(prunable: usize, fraction: f64) -> usize {
    if !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    let raw = prunable as f64 * fraction;
    (raw - 1e-9).ceil().max(0.0) as usize
}

/// Drop the oldest `ceil(prunable * target_fraction)` prunable entries.
///
/// Ties on [`Prunable::age_key`] are broken by position, earlier first.
pub fn prune<E: Prunable>(collection: Vec<E>, target_fraction: f64) -> Pruned<E> {
    let mut candidates: Vec<(u64, usize)> = collection
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_protected())
        .map(|(i, e)| (e.age_key(), i))
        .collect();

    let requested = prune_count(candidates.len(), target_fraction);
    let removed = requested.min(candidates.len());

    candidates.sort_unstable();
    let victims: HashSet<usize> = candidates.into_iter().take(removed).map(|(_, i)| i).collect();

    let kept = collection
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !victims.contains(i))
        .map(|(_, e)| e)
        .collect();

    Pruned {
        kept,
        removed,
        requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        done: bool,
        at: u64,
    }

    impl Entity for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    impl Prunable for Item {
        fn is_protected(&self) -> bool {
            !self.done
        }
        fn age_key(&self) -> u64 {
            self.at
        }
    }

    fn item(id: &str, done: bool, at: u64) -> Item {
        Item {
            id: id.into(),
            done,
            at,
        }
    }

    #[test]
    fn removes_oldest_prunable_first() {
        let items = vec![
            item("a", true, 30),
            item("b", false, 1),
            item("c", true, 10),
            item("d", true, 20),
            item("e", true, 40),
        ];
        let out = prune(items, 0.5);

        assert_eq!(out.removed, 2);
        let ids: Vec<&str> = out.kept.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["a", "b", "e"]);
    }

    #[test]
    fn protected_entries_survive_any_fraction() {
        let items = vec![item("a", false, 0), item("b", true, 5), item("c", false, 1)];
        let out = prune(items, 3.0);

        assert_eq!(out.removed, 1);
        assert_eq!(out.requested, 3);
        assert!(out.exhausted());
        assert_eq!(out.kept.len(), 2);
        assert!(out.kept.iter().all(|e| e.is_protected()));
    }

    #[test]
    fn count_rounds_up_without_float_noise() {
        assert_eq!(prune_count(4, 0.25), 1);
        assert_eq!(prune_count(5, 0.25), 2);
        assert_eq!(prune_count(30, 0.1), 3);
        assert_eq!(prune_count(0, 0.25), 0);
        assert_eq!(prune_count(10, 0.0), 0);
        assert_eq!(prune_count(10, f64::NAN), 0);
    }
}
