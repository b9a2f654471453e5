//! Paywall Net - client-side network resilience layer
//!
//! Priority queueing, TTL caching, throttling, retry with backoff and
//! single-flight token refresh behind one HTTP facade.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod queue;
pub mod retry;
pub mod tasks;
pub mod throttle;
pub mod transport;

pub use auth::{Credentials, MemoryTokenStore, TokenCoordinator, TokenStore};
pub use cache::{KeyPattern, TtlCache};
pub use client::{
    http_delete, http_get, http_patch, http_post, http_put, install_default, ApiResult,
    HttpClient, RequestOptions,
};
pub use config::Config;
pub use error::{ApiError, NetError};
pub use events::{EventBus, Subscription};
pub use queue::{Priority, RequestQueue};
pub use retry::{with_retry, RetryPolicy};
pub use tasks::spawn_cleanup_task;
pub use throttle::Throttler;
pub use transport::{ReqwestTransport, Transport};
