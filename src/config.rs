//! Configuration Module
//!
//! Loads client tuning from environment variables. Missing or unparseable
//! values fall back to the defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Network layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL every request path is joined to
    pub api_base_url: String,
    /// Requests allowed to run at once
    pub max_concurrent: usize,
    /// Default per-request deadline in milliseconds
    pub request_timeout_ms: u64,
    pub cache_max_entries: usize,
    pub cache_default_ttl_ms: u64,
    /// Minimum spacing between throttled request starts in milliseconds
    pub throttle_interval_ms: u64,
    pub retry_max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Delay before the single retry of a 5xx response in milliseconds
    pub server_retry_delay_ms: u64,
    pub refresh_path: String,
    /// Background cache sweep interval in seconds
    pub cleanup_interval: u64,
    /// Seconds before recorded expiry at which a token counts as expired
    pub token_expiry_leeway_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a Config from environment variables.
    ///
    /// # Environment Variables
    /// - `API_BASE_URL` (default: `http://localhost:3000/api`)
    /// - `MAX_CONCURRENT` (default: 5)
    /// - `REQUEST_TIMEOUT_MS` (default: 30000)
    /// - `CACHE_MAX_ENTRIES` (default: 100)
    /// - `CACHE_DEFAULT_TTL_MS` (default: 300000)
    /// - `THROTTLE_INTERVAL_MS` (default: 1000)
    /// - `RETRY_MAX_RETRIES` (default: 3)
    /// - `RETRY_INITIAL_DELAY_MS` (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` (default: 30000)
    /// - `SERVER_RETRY_DELAY_MS` (default: 1000)
    /// - `REFRESH_PATH` (default: `/auth/refresh`)
    /// - `CLEANUP_INTERVAL` seconds (default: 60)
    /// - `TOKEN_EXPIRY_LEEWAY_SECS` (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env_or("API_BASE_URL", defaults.api_base_url),
            max_concurrent: env_or("MAX_CONCURRENT", defaults.max_concurrent),
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            cache_max_entries: env_or("CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_default_ttl_ms: env_or("CACHE_DEFAULT_TTL_MS", defaults.cache_default_ttl_ms),
            throttle_interval_ms: env_or("THROTTLE_INTERVAL_MS", defaults.throttle_interval_ms),
            retry_max_retries: env_or("RETRY_MAX_RETRIES", defaults.retry_max_retries),
            retry_initial_delay_ms: env_or("RETRY_INITIAL_DELAY_MS", defaults.retry_initial_delay_ms),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            server_retry_delay_ms: env_or("SERVER_RETRY_DELAY_MS", defaults.server_retry_delay_ms),
            refresh_path: env_or("REFRESH_PATH", defaults.refresh_path),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            token_expiry_leeway_secs: env_or("TOKEN_EXPIRY_LEEWAY_SECS", defaults.token_expiry_leeway_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_default_ttl_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn server_retry_delay(&self) -> Duration {
        Duration::from_millis(self.server_retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            max_concurrent: 5,
            request_timeout_ms: 30_000,
            cache_max_entries: 100,
            cache_default_ttl_ms: 300_000,
            throttle_interval_ms: 1_000,
            retry_max_retries: 3,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            server_retry_delay_ms: 1_000,
            refresh_path: "/auth/refresh".to_string(),
            cleanup_interval: 60,
            token_expiry_leeway_secs: 10,
        }
    }
}
