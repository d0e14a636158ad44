//! Observed-remove set.

use super::Crdt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set where concurrent add and remove resolve in favour of the add.
///
/// Every `add` attaches a globally-unique tag (`replica:sequence`); `remove`
/// tombstones the tags observed at removal time. An element is present when
/// at least one of its tags is not tombstoned, so an add whose tag was not
/// observed by a concurrent remove survives the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrSet<T: Ord + Clone> {
    agent_id: String,
    /// element -> live-or-dead tags ever attached to it
    adds: BTreeMap<T, BTreeSet<String>>,
    /// tags removed from observation
    tombstones: BTreeSet<String>,
    /// per-replica tag sequence, merged with max so tags stay unique
    sequences: BTreeMap<String, u64>,
}

impl<T: Ord + Clone> OrSet<T> {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            adds: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            sequences: BTreeMap::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Insert `element` under a fresh unique tag.
    pub fn add(&mut self, element: T) {
        let sequence = self.sequences.entry(self.agent_id.clone()).or_insert(0);
        *sequence += 1;
        let tag = format!("{}:{}", self.agent_id, sequence);
        self.adds.entry(element).or_default().insert(tag);
    }

    /// Tombstone every currently-observed tag of `element`.
    ///
    /// Returns whether the element was observed (and therefore removed).
    pub fn remove(&mut self, element: &T) -> bool {
        let Some(tags) = self.adds.get(element) else {
            return false;
        };
        let live: Vec<String> = tags
            .iter()
            .filter(|tag| !self.tombstones.contains(*tag))
            .cloned()
            .collect();
        if live.is_empty() {
            return false;
        }
        self.tombstones.extend(live);
        true
    }

    /// Whether `element` has at least one live tag.
    pub fn contains(&self, element: &T) -> bool {
        self.adds
            .get(element)
            .is_some_and(|tags| tags.iter().any(|tag| !self.tombstones.contains(tag)))
    }

    /// The visible elements.
    pub fn value(&self) -> BTreeSet<T> {
        self.adds
            .iter()
            .filter(|(_, tags)| tags.iter().any(|tag| !self.tombstones.contains(tag)))
            .map(|(element, _)| element.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.value().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Ord + Clone> Crdt for OrSet<T> {
    fn merge(&self, other: &Self) -> Self {
        let mut adds = self.adds.clone();
        for (element, tags) in &other.adds {
            adds.entry(element.clone()).or_default().extend(tags.iter().cloned());
        }

        let mut tombstones = self.tombstones.clone();
        tombstones.extend(other.tombstones.iter().cloned());

        let mut sequences = self.sequences.clone();
        for (replica, &sequence) in &other.sequences {
            let entry = sequences.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(sequence);
        }

        Self {
            agent_id: self.agent_id.clone(),
            adds,
            tombstones,
            sequences,
        }
    }
}

impl<T: Ord + Clone> PartialEq for OrSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.adds == other.adds
            && self.tombstones == other.tombstones
            && self.sequences == other.sequences
    }
}

impl<T: Ord + Clone> Eq for OrSet<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_contains() {
        let mut set = OrSet::new("a1");
        set.add("x");
        assert!(set.contains(&"x"));
        assert!(!set.contains(&"y"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_observed_element() {
        let mut set = OrSet::new("a1");
        set.add("x");
        assert!(set.remove(&"x"));
        assert!(!set.contains(&"x"));
        // Removing again is a no-op: nothing left to observe.
        assert!(!set.remove(&"x"));
    }

    #[test]
    fn test_re_add_after_remove() {
        let mut set = OrSet::new("a1");
        set.add("x");
        set.remove(&"x");
        set.add("x");
        assert!(set.contains(&"x"));
    }

    #[test]
    fn test_concurrent_add_wins_over_remove() {
        let mut a = OrSet::new("a1");
        a.add("x");

        // b observes a's state, then removes x while a concurrently re-adds it.
        let mut b = a.merge(&OrSet::new("a2"));
        b.remove(&"x");
        a.add("x"); // tag unseen by b's remove

        let merged = a.merge(&b);
        assert!(merged.contains(&"x"));
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_union_and_idempotence() {
        let mut a = OrSet::new("a1");
        a.add(1);
        a.add(2);
        let mut b = OrSet::new("a2");
        b.add(3);

        let merged = a.merge(&b);
        assert_eq!(merged.value(), BTreeSet::from([1, 2, 3]));
        assert_eq!(merged.merge(&merged), merged);
    }

    #[test]
    fn test_merge_does_not_mutate_operands() {
        let mut a = OrSet::new("a1");
        a.add("x");
        let b = OrSet::<&str>::new("a2");
        let snapshot = a.clone();
        let _ = a.merge(&b);
        assert_eq!(a, snapshot);
    }
}
