//! Grow-only counter.

use super::Crdt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A counter that can only grow.
///
/// Each replica owns one entry in the map; the counter value is the sum over
/// all entries and the join takes the pointwise maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GCounter {
    /// Replica identity used by [`increment`](Self::increment)
    agent_id: String,
    /// Per-replica monotonic counts
    counts: BTreeMap<String, u64>,
}

impl GCounter {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            counts: BTreeMap::new(),
        }
    }

    /// Replica this handle mutates through.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Add `n` to the local replica's entry.
    pub fn increment(&mut self, n: u64) {
        *self.counts.entry(self.agent_id.clone()).or_insert(0) += n;
    }

    /// Sum over all replica entries.
    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    /// The count contributed by one replica.
    pub fn replica_count(&self, agent_id: &str) -> u64 {
        self.counts.get(agent_id).copied().unwrap_or(0)
    }

    /// Number of replicas that have contributed.
    pub fn replica_len(&self) -> usize {
        self.counts.len()
    }
}

impl Crdt for GCounter {
    fn merge(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (replica, &count) in &other.counts {
            let entry = counts.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        Self {
            agent_id: self.agent_id.clone(),
            counts,
        }
    }
}

// Convergent payload only; replica identity is a local handle.
impl PartialEq for GCounter {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl Eq for GCounter {}

impl std::fmt::Display for GCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GCounter({})", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_value() {
        let mut counter = GCounter::new("a1");
        counter.increment(5);
        counter.increment(2);
        assert_eq!(counter.value(), 7);
        assert_eq!(counter.replica_count("a1"), 7);
        assert_eq!(counter.replica_count("a2"), 0);
    }

    #[test]
    fn test_merge_takes_pointwise_max() {
        let mut a = GCounter::new("a1");
        a.increment(5);
        let mut b = GCounter::new("a2");
        b.increment(3);

        let merged = a.merge(&b);
        assert_eq!(merged.value(), 8);
        // Operands untouched.
        assert_eq!(a.value(), 5);
        assert_eq!(b.value(), 3);
    }

    #[test]
    fn test_merge_convergence_scenario() {
        let mut a = GCounter::new("a1");
        a.increment(100);
        let mut b = GCounter::new("a2");
        b.increment(75);

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        assert_eq!(ab.value(), 175);
        assert_eq!(ab, ba);
        assert_eq!(ab.merge(&ab).value(), 175);
    }

    #[test]
    fn test_merge_same_replica_keeps_max() {
        let mut a = GCounter::new("a1");
        a.increment(5);
        let mut stale = a.clone();
        a.increment(4);
        stale.increment(1); // diverged copy of the same replica

        let merged = a.merge(&stale);
        assert_eq!(merged.replica_count("a1"), 9); // max(9, 6)
    }
}
