//! Concurrent building blocks shared by the session and outcome stores.
//!
//! - [`ConcurrentStore`]: an ordered key/value map behind a reader-writer
//!   lock. Writes are serialized by the exclusive lock (one writer per
//!   store); reads share the lock and never wait on each other.
//! - [`CounterTable`]: sharded atomic total/success counters for hot paths.
//! - [`heir`]: ownership handoff so a table survives its owner.

pub mod heir;

pub use heir::{Acquired, Heir, OwnedTable};

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ============================================================================
// ConcurrentStore
// ============================================================================

/// Ordered concurrent map.
///
/// Iteration order is key order, so a timestamp-like key gives oldest-first
/// iteration and cheap eviction of the oldest entries.
#[derive(Debug)]
pub struct ConcurrentStore<K, V> {
    entries: RwLock<BTreeMap<K, V>>,
    len: AtomicUsize,
}

impl<K: Ord + Clone, V: Clone> ConcurrentStore<K, V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Number of entries. Lock-free.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the store is empty. Lock-free.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a value, returning the previous one for the key.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut entries = self.entries.write();
        let previous = entries.insert(key, value);
        self.len.store(entries.len(), Ordering::Release);
        previous
    }

    /// Clone of the value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Mutate the value for `key` in place under the write lock.
    ///
    /// Returns `None` when the key is absent. The closure must check its
    /// preconditions before writing; nothing is rolled back.
    pub fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        entries.get_mut(key).map(f)
    }

    /// Remove `key`. Removing a missing key is a no-op.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write();
        let removed = entries.remove(key);
        self.len.store(entries.len(), Ordering::Release);
        removed
    }

    /// Remove every entry for which `keep` returns false, in one pass.
    ///
    /// Returns the number of entries removed.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, v| keep(k, v));
        self.len.store(entries.len(), Ordering::Release);
        before - entries.len()
    }

    /// Remove the `count` smallest keys. Returns how many were removed.
    pub fn prune_oldest(&self, count: usize) -> usize {
        let mut entries = self.entries.write();
        let removed = Self::pop_front(&mut entries, count);
        self.len.store(entries.len(), Ordering::Release);
        removed
    }

    /// Remove `floor(len × fraction)` oldest entries when `len > cap`.
    ///
    /// The check and the removal happen under one write lock, so two callers
    /// racing past the cap prune once.
    pub fn prune_if_over(&self, cap: usize, fraction: f64) -> usize {
        let mut entries = self.entries.write();
        if entries.len() <= cap {
            return 0;
        }
        let count = ((entries.len() as f64) * fraction).floor() as usize;
        let removed = Self::pop_front(&mut entries, count);
        self.len.store(entries.len(), Ordering::Release);
        removed
    }

    fn pop_front(entries: &mut BTreeMap<K, V>, count: usize) -> usize {
        let mut removed = 0;
        while removed < count && entries.pop_first().is_some() {
            removed += 1;
        }
        removed
    }

    /// Ordered copy of all entries.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Ordered copy of all keys.
    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    /// Up to `n` largest entries, largest first.
    pub fn newest(&self, n: usize) -> Vec<(K, V)> {
        self.entries
            .read()
            .iter()
            .rev()
            .take(n)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Smallest key.
    pub fn first_key(&self) -> Option<K> {
        self.entries.read().keys().next().cloned()
    }

    /// Run a read-only computation over the ordered map without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&BTreeMap<K, V>) -> R) -> R {
        f(&self.entries.read())
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.len.store(0, Ordering::Release);
    }
}

impl<K: Ord + Clone, V: Clone> Default for ConcurrentStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CounterTable
// ============================================================================

#[derive(Debug, Default)]
struct Counter {
    total: AtomicU64,
    success: AtomicU64,
}

impl Counter {
    fn bump(&self, success: bool) -> CounterSnapshot {
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        let success = if success {
            self.success.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.success.load(Ordering::Acquire)
        };
        CounterSnapshot { total, success }
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::Acquire),
            success: self.success.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time value of a total/success counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Number of recorded events.
    pub total: u64,
    /// Number of recorded successes.
    pub success: u64,
}

impl CounterSnapshot {
    /// `success / total`, or 0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}

/// Sharded table of atomic total/success counters.
#[derive(Debug)]
pub struct CounterTable<K: Eq + Hash> {
    counters: DashMap<K, Counter>,
}

impl<K: Eq + Hash + Clone> CounterTable<K> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Count one event; returns the counter values after this event.
    pub fn record(&self, key: K, success: bool) -> CounterSnapshot {
        if let Some(counter) = self.counters.get(&key) {
            return counter.bump(success);
        }
        self.counters.entry(key).or_default().bump(success)
    }

    /// Current values for `key`.
    pub fn get(&self, key: &K) -> CounterSnapshot {
        self.counters
            .get(key)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Current values for every key.
    pub fn snapshot(&self) -> Vec<(K, CounterSnapshot)> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for CounterTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
