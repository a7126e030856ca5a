//! In-memory replica state: key -> (value, timestamp).
//!
//! Every node owns one [`ReplicaStore`]. The leader writes to it through
//! [`ReplicaStore::stamp_and_apply`], secondaries through
//! [`ReplicaStore::apply`]. Reads always see a value together with the
//! timestamp it was written with.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A stored value and the logical timestamp it was written at on this replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub timestamp: u64,
}

/// Outcome of applying a replicated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The incoming entry replaced whatever was stored.
    Stored(Entry),
    /// A strictly newer entry was already stored and was kept.
    KeptNewer(Entry),
}

/// Thread-safe key-value store shared by all connection handlers of a node.
///
/// A single `RwLock` guards the map so the value and timestamp of a key are
/// always read and replaced together. Reads of any keys run in parallel; the
/// write lock is only held for the duration of one map operation, never across
/// network I/O.
#[derive(Debug, Default)]
pub struct ReplicaStore {
    data: RwLock<HashMap<String, Entry>>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.read().get(key).cloned()
    }

    /// Stores `(value, timestamp)` unconditionally, replacing any prior entry.
    pub fn apply(&self, key: String, value: String, timestamp: u64) -> Entry {
        let entry = Entry { value, timestamp };
        self.write().insert(key, entry.clone());
        entry
    }

    /// Stores the entry unless a strictly newer one is already present.
    pub fn apply_if_not_older(&self, key: String, value: String, timestamp: u64) -> Applied {
        let mut data = self.write();
        if let Some(current) = data.get(&key) {
            if current.timestamp > timestamp {
                return Applied::KeptNewer(current.clone());
            }
        }
        let entry = Entry { value, timestamp };
        data.insert(key, entry.clone());
        Applied::Stored(entry)
    }

    /// Leader write: assigns the key's next timestamp and stores it atomically.
    ///
    /// The timestamp is `now_ms`, bumped to one past the stored timestamp when
    /// the clock has not moved forward, so timestamps per key strictly increase.
    pub fn stamp_and_apply(&self, key: String, value: String, now_ms: u64) -> Entry {
        let mut data = self.write();
        let timestamp = match data.get(&key) {
            Some(current) => now_ms.max(current.timestamp.saturating_add(1)),
            None => now_ms,
        };
        let entry = Entry { value, timestamp };
        data.insert(key, entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Sorted copy of every entry. The lock is released before returning.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    // A panic while holding the lock cannot leave a half-written entry behind
    // (inserts are a single map operation), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn missing_keys_stay_missing() {
        let store = ReplicaStore::new();
        assert_eq!(store.get("nope"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn apply_is_unconditional() {
        let store = ReplicaStore::new();
        store.apply("k".into(), "new".into(), 20);
        store.apply("k".into(), "old".into(), 10);
        assert_eq!(
            store.get("k"),
            Some(Entry {
                value: "old".into(),
                timestamp: 10
            })
        );
    }

    #[test]
    fn apply_if_not_older_keeps_newer_entry() {
        let store = ReplicaStore::new();
        store.apply("k".into(), "new".into(), 20);

        let outcome = store.apply_if_not_older("k".into(), "old".into(), 10);
        assert_eq!(
            outcome,
            Applied::KeptNewer(Entry {
                value: "new".into(),
                timestamp: 20
            })
        );

        let outcome = store.apply_if_not_older("k".into(), "same".into(), 20);
        assert!(matches!(outcome, Applied::Stored(_)));
        assert_eq!(store.get("k").map(|entry| entry.value), Some("same".into()));
    }

    #[test]
    fn stamps_increase_even_when_clock_stalls() {
        let store = ReplicaStore::new();
        let first = store.stamp_and_apply("k".into(), "a".into(), 100);
        let second = store.stamp_and_apply("k".into(), "b".into(), 100);
        let third = store.stamp_and_apply("k".into(), "c".into(), 50);
        let fresh = store.stamp_and_apply("k".into(), "d".into(), 500);

        assert_eq!(first.timestamp, 100);
        assert_eq!(second.timestamp, 101);
        assert_eq!(third.timestamp, 102);
        assert_eq!(fresh.timestamp, 500);
        assert_eq!(store.get("k"), Some(fresh));
    }

    #[test]
    fn stamps_are_per_key() {
        let store = ReplicaStore::new();
        store.stamp_and_apply("a".into(), "1".into(), 900);
        let other = store.stamp_and_apply("b".into(), "1".into(), 10);
        assert_eq!(other.timestamp, 10);
    }

    #[test]
    fn concurrent_writers_never_tear_pairs() {
        let store = Arc::new(ReplicaStore::new());
        let writers: Vec<_> = (0..8u64)
            .map(|id| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..200u64 {
                        let ts = id * 1_000 + round;
                        store.apply("shared".into(), ts.to_string(), ts);
                        store.apply(format!("own-{id}"), round.to_string(), round);
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            if let Some(entry) = store.get("shared") {
                assert_eq!(entry.value, entry.timestamp.to_string());
            }
        }
        for writer in writers {
            writer.join().expect("writer thread");
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 9);
        for id in 0..8u64 {
            assert_eq!(snapshot[&format!("own-{id}")].value, "199");
        }
    }
}
