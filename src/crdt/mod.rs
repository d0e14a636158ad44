//! Conflict-free replicated data types.
//!
//! State-based CRDTs backing swarm coordination: replicas mutate locally and
//! exchange whole states; `merge` is a pure join that never touches its
//! operands. For every type here the join satisfies the three CRDT laws:
//!
//! - Commutativity: `merge(a, b) == merge(b, a)`
//! - Associativity: `merge(merge(a, b), c) == merge(a, merge(b, c))`
//! - Idempotence: `merge(a, a) == a`
//!
//! Equality compares the convergent payload only; the replica identity a
//! value carries for local mutation does not participate.

pub mod g_counter;
pub mod lww_register;
pub mod or_set;
pub mod pn_counter;

pub use g_counter::GCounter;
pub use lww_register::LwwRegister;
pub use or_set::OrSet;
pub use pn_counter::PnCounter;

/// State-based CRDT join.
pub trait Crdt: Sized {
    /// Pure merge: returns the least upper bound of `self` and `other`
    /// without mutating either.
    fn merge(&self, other: &Self) -> Self;
}
