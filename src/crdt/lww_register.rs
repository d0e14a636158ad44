//! Last-write-wins register.

use super::Crdt;
use serde::{Deserialize, Serialize};

/// A register whose join keeps the entry with the greatest `(timestamp,
/// writer)` pair. The local clock is strictly increasing even when the wall
/// clock stalls, so two writes through the same handle never tie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    agent_id: String,
    value: Option<T>,
    /// Microseconds; logical, pinned to be strictly increasing locally
    timestamp: u64,
    /// Replica that produced the current value
    writer: String,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            writer: agent_id.clone(),
            agent_id,
            value: None,
            timestamp: 0,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Overwrite the value, stamping it with a strictly-increasing clock.
    pub fn set(&mut self, value: T) {
        let now = Self::wall_clock_micros();
        self.timestamp = now.max(self.timestamp + 1);
        self.value = Some(value);
        self.writer = self.agent_id.clone();
    }

    /// Overwrite the value with an explicit stamp, for replaying recorded
    /// histories. The caller guarantees stamps are unique per writer; the
    /// local strictly-increasing clock is still advanced past the stamp.
    pub fn set_at(&mut self, value: T, timestamp: u64) {
        self.timestamp = timestamp.max(self.timestamp + 1);
        self.value = Some(value);
        self.writer = self.agent_id.clone();
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// `(timestamp, writer)` of the current value.
    pub fn stamp(&self) -> (u64, &str) {
        (self.timestamp, &self.writer)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn wall_clock_micros() -> u64 {
        chrono::Utc::now().timestamp_micros().max(0) as u64
    }
}

impl<T: Clone> Crdt for LwwRegister<T> {
    fn merge(&self, other: &Self) -> Self {
        // Greater timestamp wins; ties broken by lexicographic writer id.
        let keep_other = (other.timestamp, other.writer.as_str())
            > (self.timestamp, self.writer.as_str());
        let (value, timestamp, writer) = if keep_other {
            (other.value.clone(), other.timestamp, other.writer.clone())
        } else {
            (self.value.clone(), self.timestamp, self.writer.clone())
        };
        Self {
            agent_id: self.agent_id.clone(),
            value,
            timestamp,
            writer,
        }
    }
}

impl<T: PartialEq> PartialEq for LwwRegister<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.timestamp == other.timestamp
            && self.writer == other.writer
    }
}

impl<T: Eq> Eq for LwwRegister<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut register = LwwRegister::new("a1");
        assert!(register.get().is_none());
        register.set("v1".to_string());
        assert_eq!(register.get(), Some(&"v1".to_string()));
    }

    #[test]
    fn test_local_clock_strictly_increases() {
        let mut register = LwwRegister::new("a1");
        register.set(1);
        let (t1, _) = register.stamp();
        register.set(2);
        let (t2, _) = register.stamp();
        assert!(t2 > t1);
    }

    #[test]
    fn test_merge_keeps_newer_write() {
        let mut a = LwwRegister::new("a1");
        a.set("old".to_string());
        let mut b = LwwRegister::new("a2");
        b.set("new".to_string());
        // Force b to be strictly newer regardless of wall clock resolution.
        b.timestamp = a.timestamp + 10;

        let merged = a.merge(&b);
        assert_eq!(merged.get(), Some(&"new".to_string()));
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_tie_breaks_by_writer_id() {
        let mut a = LwwRegister::new("a1");
        a.set("from-a1".to_string());
        let mut b = LwwRegister::new("a2");
        b.set("from-a2".to_string());
        b.timestamp = a.timestamp; // force the tie

        let merged = a.merge(&b);
        // "a2" > "a1" lexicographically, so a2's write wins.
        assert_eq!(merged.get(), Some(&"from-a2".to_string()));
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_idempotent() {
        let mut a = LwwRegister::new("a1");
        a.set(42);
        assert_eq!(a.merge(&a), a);
    }
}
