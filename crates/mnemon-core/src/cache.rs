//! Time- and size-bounded key/value cache.
//!
//! Used to memoize expensive lookups (per-query embeddings, per-entity
//! role lookups). Two bounds apply independently:
//!
//! - **capacity**: inserting past capacity evicts the least-recently-used
//!   entry; `get` on a hit refreshes recency (move-to-end semantics).
//! - **TTL**: an entry older than the time-to-live is treated as absent
//!   on `get`/`contains` even while still physically present; `cleanup`
//!   sweeps stale entries eagerly to reclaim memory.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    /// Logical access clock for LRU ordering.
    last_access: u64,
}

/// Bounded LRU cache with per-entry TTL.
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries, each live for
    /// `ttl` after insertion.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    ///
    /// A stale entry is removed on the spot and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let fresh = match self.entries.get(key) {
            Some(e) => e.inserted_at.elapsed() <= self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if !fresh {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }

        self.clock += 1;
        self.hits += 1;
        let entry = self.entries.get_mut(key).unwrap();
        entry.last_access = self.clock;
        Some(&entry.value)
    }

    /// Whether a live (non-stale) entry exists. Does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() <= self.ttl)
            .unwrap_or(false)
    }

    /// Insert a value, evicting the least-recently-used entry if the
    /// capacity bound is hit. Inserting an existing key replaces it.
    pub fn insert(&mut self, key: K, value: V) {
        self.clock += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_access: self.clock,
            },
        );
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Physical entry count, including not-yet-swept stale entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep all stale entries without waiting for access-triggered
    /// eviction.
    pub fn cleanup(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
    }

    /// Hit count since construction.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Miss count since construction.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
        }
    }
}
