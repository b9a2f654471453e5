//! Cache Module
//!
//! Provides in-memory caching with TTL expiration and insertion-order eviction.

mod entry;
mod order;
mod pattern;
mod stats;
mod store;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

// Re-export public types
pub use entry::CacheEntry;
pub use order::InsertionOrder;
pub use pattern::KeyPattern;
pub use stats::CacheStats;
pub use store::TtlCache;

// == Public Constants ==
/// TTL applied when a caller does not choose one
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default capacity of the response cache
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Response cache shared between the client facade and the sweep task.
pub type SharedCache = Arc<RwLock<TtlCache<serde_json::Value>>>;
