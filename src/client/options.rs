//! Per-request behavior switches.

use std::time::Duration;

use reqwest::Method;

use crate::cache::KeyPattern;
use crate::queue::Priority;

/// How one facade call is cached, scheduled and retried.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Read-through cache key for GET requests
    pub cache_key: Option<String>,
    /// Cache lifetime; setting it without a key derives `GET:<path>`
    pub cache_ttl: Option<Duration>,
    pub priority: Priority,
    /// Overrides the queue's default deadline
    pub timeout: Option<Duration>,
    /// Overrides the client's retry count
    pub retries: Option<u32>,
    /// Route through the throttler before queueing
    pub throttled: bool,
    /// Cache entries removed after the call succeeds
    pub invalidate: Option<KeyPattern>,
    /// Attach the bearer token (default `true`)
    pub authenticated: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache_key: None,
            cache_ttl: None,
            priority: Priority::Normal,
            timeout: None,
            retries: None,
            throttled: false,
            invalidate: None,
            authenticated: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    pub fn invalidate(mut self, pattern: impl Into<KeyPattern>) -> Self {
        self.invalidate = Some(pattern.into());
        self
    }

    /// Sends the request without credentials (login, public content).
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Cache key used for this call, if it reads through the cache.
    /// Only GET requests are cached.
    pub fn resolved_cache_key(&self, method: &Method, path: &str) -> Option<String> {
        if *method != Method::GET {
            return None;
        }
        match (&self.cache_key, self.cache_ttl) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(_)) => Some(format!("GET:{}", path)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RequestOptions::default();
        assert!(options.authenticated);
        assert!(!options.throttled);
        assert_eq!(options.priority, Priority::Normal);
        assert!(options.resolved_cache_key(&Method::GET, "/articles").is_none());
    }

    #[test]
    fn test_cache_key_resolution() {
        let explicit = RequestOptions::new().cache_key("articles:list");
        assert_eq!(
            explicit.resolved_cache_key(&Method::GET, "/articles").as_deref(),
            Some("articles:list")
        );

        let derived = RequestOptions::new().cache_ttl(Duration::from_secs(5));
        assert_eq!(
            derived.resolved_cache_key(&Method::GET, "/articles").as_deref(),
            Some("GET:/articles")
        );
    }

    #[test]
    fn test_mutations_never_cached() {
        let options = RequestOptions::new().cache_key("articles:list");
        assert!(options.resolved_cache_key(&Method::POST, "/articles").is_none());
        assert!(options.resolved_cache_key(&Method::DELETE, "/articles/1").is_none());
    }
}
