//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// == Cache Entry ==
/// A single cached value with its expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the entry was written
    pub created_at: Instant,
    /// Deadline after which the entry is stale
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from now.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Lifetime; `Duration::MAX` or anything too large to represent
    ///   caps at a deadline roughly a century away
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// An entry is still served at exactly its deadline and expires strictly after it.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    // == Time To Live ==
    /// Remaining lifetime; zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
