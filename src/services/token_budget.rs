//! Token-budget admission control.
//!
//! Partitions an integer token pool across named agents. Every operation is
//! atomic under one internal mutex, and the two invariants hold at every
//! observable point: the sum of allocations never exceeds the total budget,
//! and no agent's consumption exceeds its allocation.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::error::{CoordinationError, CoordinationResult};

// ============================================================================
// Supporting types
// ============================================================================

/// Point-in-time view of the budget ledger.
#[derive(Debug, Clone, Default)]
pub struct BudgetSnapshot {
    /// Configured pool size; 0 means unlimited
    pub total_budget: u64,
    /// Sum of all allocations
    pub allocated: u64,
    /// Sum of all consumption
    pub consumed: u64,
    /// Per-agent `(allocated, consumed)`
    pub per_agent: HashMap<String, (u64, u64)>,
}

struct Inner {
    allocations: HashMap<String, u64>,
    consumed: HashMap<String, u64>,
}

impl Inner {
    fn allocated_sum(&self) -> u64 {
        self.allocations.values().sum()
    }
}

// ============================================================================
// TokenBudget
// ============================================================================

/// Swarm-wide token accounting.
pub struct TokenBudget {
    /// 0 disables the global cap; per-agent caps still apply
    total_budget: u64,
    inner: Mutex<Inner>,
}

impl TokenBudget {
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            inner: Mutex::new(Inner {
                allocations: HashMap::new(),
                consumed: HashMap::new(),
            }),
        }
    }

    /// Reserve `amount` tokens for `agent_id`.
    ///
    /// Fails with `BudgetExceeded` when the reservation would push the
    /// allocation sum past the total budget; state is unchanged on failure.
    pub async fn allocate(&self, agent_id: &str, amount: u64) -> CoordinationResult<()> {
        let mut inner = self.inner.lock().await;
        if self.total_budget > 0 {
            let allocated = inner.allocated_sum();
            if allocated + amount > self.total_budget {
                return Err(CoordinationError::BudgetExceeded {
                    requested: amount,
                    available: self.total_budget.saturating_sub(allocated),
                });
            }
        }
        *inner.allocations.entry(agent_id.to_string()).or_insert(0) += amount;
        debug!(agent_id, amount, "allocated tokens");
        Ok(())
    }

    /// Spend `amount` of `agent_id`'s allocation.
    pub async fn consume(&self, agent_id: &str, amount: u64) -> CoordinationResult<()> {
        let mut inner = self.inner.lock().await;
        let allocation = inner.allocations.get(agent_id).copied().unwrap_or(0);
        let spent = inner.consumed.get(agent_id).copied().unwrap_or(0);
        if spent + amount > allocation {
            return Err(CoordinationError::BudgetExceeded {
                requested: amount,
                available: allocation.saturating_sub(spent),
            });
        }
        *inner.consumed.entry(agent_id.to_string()).or_insert(0) += amount;
        Ok(())
    }

    /// Return `amount` of `agent_id`'s spent tokens; floors at zero.
    pub async fn refund(&self, agent_id: &str, amount: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(spent) = inner.consumed.get_mut(agent_id) {
            *spent = spent.saturating_sub(amount);
        }
    }

    /// Atomically replace the allocation table.
    ///
    /// Fails with `InvalidArgument` when any new allocation is below that
    /// agent's current consumption, or when the new sum exceeds the total
    /// budget. State is unchanged on failure.
    pub async fn rebalance(
        &self,
        new_allocations: HashMap<String, u64>,
    ) -> CoordinationResult<()> {
        let mut inner = self.inner.lock().await;

        for (agent_id, spent) in &inner.consumed {
            let proposed = new_allocations.get(agent_id).copied().unwrap_or(0);
            if proposed < *spent {
                return Err(CoordinationError::InvalidArgument(format!(
                    "rebalance would strand agent {agent_id}: consumed {spent} > proposed {proposed}"
                )));
            }
        }

        if self.total_budget > 0 {
            let proposed_sum: u64 = new_allocations.values().sum();
            if proposed_sum > self.total_budget {
                return Err(CoordinationError::InvalidArgument(format!(
                    "rebalance sum {proposed_sum} exceeds total budget {}",
                    self.total_budget
                )));
            }
        }

        inner.allocations = new_allocations;
        Ok(())
    }

    /// Unspent allocation for `agent_id`.
    pub async fn remaining(&self, agent_id: &str) -> u64 {
        let inner = self.inner.lock().await;
        let allocation = inner.allocations.get(agent_id).copied().unwrap_or(0);
        let spent = inner.consumed.get(agent_id).copied().unwrap_or(0);
        allocation.saturating_sub(spent)
    }

    /// Drop an agent's ledger rows, freeing its allocation back to the pool.
    /// Returns the unspent amount released.
    pub async fn release(&self, agent_id: &str) -> u64 {
        let mut inner = self.inner.lock().await;
        let allocation = inner.allocations.remove(agent_id).unwrap_or(0);
        let spent = inner.consumed.remove(agent_id).unwrap_or(0);
        allocation.saturating_sub(spent)
    }

    /// Point-in-time snapshot of the whole ledger.
    pub async fn snapshot(&self) -> BudgetSnapshot {
        let inner = self.inner.lock().await;
        let mut per_agent: HashMap<String, (u64, u64)> = HashMap::new();
        for (agent_id, &allocation) in &inner.allocations {
            per_agent.insert(agent_id.clone(), (allocation, 0));
        }
        for (agent_id, &spent) in &inner.consumed {
            per_agent.entry(agent_id.clone()).or_insert((0, 0)).1 = spent;
        }
        BudgetSnapshot {
            total_budget: self.total_budget,
            allocated: inner.allocated_sum(),
            consumed: inner.consumed.values().sum(),
            per_agent,
        }
    }
}
