//! Positive-negative counter.

use super::{Crdt, GCounter};
use serde::{Deserialize, Serialize};

/// A counter supporting increment and decrement, built from two grow-only
/// counters: one for additions, one for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    positive: GCounter,
    negative: GCounter,
}

impl PnCounter {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            positive: GCounter::new(agent_id.clone()),
            negative: GCounter::new(agent_id),
        }
    }

    pub fn agent_id(&self) -> &str {
        self.positive.agent_id()
    }

    pub fn increment(&mut self, n: u64) {
        self.positive.increment(n);
    }

    pub fn decrement(&mut self, n: u64) {
        self.negative.increment(n);
    }

    /// `positive - negative`; may be negative.
    #[allow(clippy::cast_possible_wrap)]
    pub fn value(&self) -> i64 {
        self.positive.value() as i64 - self.negative.value() as i64
    }
}

impl Crdt for PnCounter {
    fn merge(&self, other: &Self) -> Self {
        Self {
            positive: self.positive.merge(&other.positive),
            negative: self.negative.merge(&other.negative),
        }
    }
}

impl std::fmt::Display for PnCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PnCounter({})", self.value())
    }
}
