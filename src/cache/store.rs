//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with insertion-order eviction and
//! TTL expiration.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, InsertionOrder, KeyPattern, DEFAULT_TTL};

// == TTL Cache ==
/// Bounded key-value cache with per-entry expiry.
///
/// No operation fails: a missing or stale key is simply a miss.
#[derive(Debug)]
pub struct TtlCache<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// First-insert order for capacity eviction
    order: InsertionOrder,
    stats: CacheStats,
    max_entries: usize,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    // == Constructor ==
    /// Creates a cache holding at most `max_entries` values (minimum 1).
    ///
    /// # Arguments
    /// * `max_entries` - Capacity; the oldest insert is evicted past it
    /// * `default_ttl` - Lifetime of entries set without an explicit TTL
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: InsertionOrder::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    /// Creates a cache with the standard five minute default TTL.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(max_entries, DEFAULT_TTL)
    }

    // == Set ==
    /// Stores a value, resetting the TTL if the key already exists.
    ///
    /// When the cache is full and the key is new, the oldest-inserted entry is
    /// evicted first.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let is_overwrite = self.entries.contains_key(&key);

        if !is_overwrite && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.order.evict_oldest() {
                debug!(key = %evicted, "cache capacity reached, evicting oldest entry");
                self.entries.remove(&evicted);
                self.stats.record_eviction();
            }
        }

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        self.entries.insert(key.clone(), entry);
        self.order.record(&key);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Get ==
    /// Returns a clone of the value if present and not expired.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value = entry.value.clone();
                self.stats.record_hit();
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expirations(1);
        }
        self.stats.record_miss();
        None
    }

    // == Contains ==
    /// True if a live entry exists. Does not touch statistics.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    // == Delete ==
    /// Removes a single key, returning whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Invalidate ==
    /// Removes every key matching `pattern` and returns how many were removed.
    pub fn invalidate(&mut self, pattern: impl Into<KeyPattern>) -> usize {
        let pattern = pattern.into();
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        self.order.retain(|key| !pattern.matches(key));
        self.stats.set_total_entries(self.entries.len());

        let removed = before - self.entries.len();
        debug!(?pattern, removed, "cache invalidated");
        removed
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.stats.set_total_entries(0);
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));

        let entries = &self.entries;
        self.order.retain(|key| entries.contains_key(key));

        let count = before - self.entries.len();
        self.stats.record_expirations(count);
        self.stats.set_total_entries(self.entries.len());
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.remove(key);
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }
}
