//! HTTP Client Facade
//!
//! Every call flows cache → throttler (optional) → queue → retry → transport.
//! Inside one attempt the bearer token is attached, a 401 triggers the shared
//! refresh and exactly one replay, and a 5xx gets one retry after a fixed delay.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::auth::{TokenCoordinator, TokenStore};
use crate::cache::{CacheStats, KeyPattern, SharedCache, TtlCache, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::client::{ApiResult, RequestOptions};
use crate::config::Config;
use crate::error::{ApiError, NetError, Result};
use crate::queue::{AbortSignal, RequestQueue};
use crate::retry::{with_retry_if, RetryPolicy};
use crate::throttle::Throttler;
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

/// Delay before the single retry of a 5xx response
pub const DEFAULT_SERVER_RETRY_DELAY: Duration = Duration::from_millis(1000);

struct ClientInner {
    transport: Arc<dyn Transport>,
    cache: SharedCache,
    queue: RequestQueue,
    throttler: Throttler,
    auth: Option<TokenCoordinator>,
    retry: RetryPolicy,
    server_retry_delay: Duration,
}

// == Http Client ==
/// Cloneable facade; clones share cache, queue and session.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("queue", &self.inner.queue)
            .field("throttler", &self.inner.throttler)
            .field("authenticated", &self.inner.auth.is_some())
            .field("retry", &self.inner.retry)
            .finish()
    }
}

impl HttpClient {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder {
            transport,
            cache: None,
            queue: None,
            throttler: None,
            auth: None,
            retry: RetryPolicy::default(),
            server_retry_delay: DEFAULT_SERVER_RETRY_DELAY,
        }
    }

    /// Wires a reqwest transport and a token coordinator over `store`.
    ///
    /// # Arguments
    /// * `config` - Base URL, queue, cache, throttle and retry tuning
    /// * `store` - Where credentials are read from and refreshed tokens written to
    ///
    /// # Returns
    /// A client, or `Configuration` if the HTTP connection pool cannot be built.
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        // Only connecting is bounded here; response deadlines are per request.
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|err| NetError::Configuration(err.to_string()))?;
        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::with_client(http, &config.api_base_url));

        let leeway = i64::try_from(config.token_expiry_leeway_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(chrono::Duration::zero);
        let auth = TokenCoordinator::builder(store, Arc::clone(&transport))
            .refresh_path(&config.refresh_path)
            .leeway(leeway)
            .build();

        let retry = RetryPolicy::new(
            config.retry_max_retries,
            Duration::from_millis(config.retry_initial_delay_ms),
        )
        .with_max_delay(Duration::from_millis(config.retry_max_delay_ms));

        Ok(Self::builder(transport)
            .cache(TtlCache::new(config.cache_max_entries, config.cache_default_ttl()))
            .queue(RequestQueue::new(config.max_concurrent, config.request_timeout()))
            .throttler(Throttler::new(config.throttle_interval()))
            .auth(auth)
            .retry_policy(retry)
            .server_retry_delay(config.server_retry_delay())
            .build())
    }

    // == Verbs ==
    pub async fn get(&self, path: &str, options: RequestOptions) -> ApiResult<Value> {
        self.request(Method::GET, path, None, options).await
    }

    /// GET decoded into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> ApiResult<T> {
        let value = self.get(path, options).await?;
        serde_json::from_value(value).map_err(|err| NetError::Decode(err.to_string()).into())
    }

    pub async fn post(&self, path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
        self.request(Method::POST, path, body, options).await
    }

    pub async fn put(&self, path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
        self.request(Method::PUT, path, body, options).await
    }

    pub async fn patch(&self, path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
        self.request(Method::PATCH, path, body, options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> ApiResult<Value> {
        self.request(Method::DELETE, path, None, options).await
    }

    // == Request ==
    /// Runs one call through the whole pipeline and normalizes any failure.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<Value> {
        let cache_key = options.resolved_cache_key(&method, path);
        if let Some(key) = &cache_key {
            if let Some(hit) = self.inner.cache.write().await.get(key) {
                debug!(key = %key, "cache hit");
                return Ok(hit);
            }
            debug!(key = %key, "cache miss");
        }

        let request = HttpRequest::new(method, path).with_body(body);
        let data = self.dispatch(request, &options).await.map_err(|err| {
            debug!(path, code = err.code(), error = %err, "request failed");
            ApiError::from(err)
        })?;

        if let Some(key) = cache_key {
            self.inner.cache.write().await.set(key, data.clone(), options.cache_ttl);
        }
        if let Some(pattern) = options.invalidate {
            let removed = self.inner.cache.write().await.invalidate(pattern);
            debug!(path, removed, "cache invalidated after request");
        }
        Ok(data)
    }

    async fn dispatch(&self, mut request: HttpRequest, options: &RequestOptions) -> Result<Value> {
        request.timeout = options.timeout;
        let inner = Arc::clone(&self.inner);
        let queue = self.inner.queue.clone();
        let policy = RetryPolicy {
            max_retries: options.retries.unwrap_or(self.inner.retry.max_retries),
            ..self.inner.retry
        };
        let priority = options.priority;
        let timeout = options.timeout;
        let authenticated = options.authenticated;

        let queued = move || async move {
            let operation = move |_signal: AbortSignal| async move {
                with_retry_if(policy, is_transient, || {
                    inner.execute_once(request.clone(), authenticated)
                })
                .await
            };
            match timeout {
                Some(timeout) => queue.enqueue_with_timeout(priority, timeout, operation).await,
                None => queue.enqueue(priority, operation).await,
            }
        };

        if options.throttled {
            self.inner.throttler.add(queued).await
        } else {
            queued().await
        }
    }

    // == Cache Management ==
    /// Removes cached responses matching `pattern`; returns how many.
    pub async fn invalidate_cache(&self, pattern: impl Into<KeyPattern>) -> usize {
        self.inner.cache.write().await.invalidate(pattern)
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.write().await.clear();
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.read().await.stats()
    }

    /// Shared handle to the response cache, e.g. for the sweep task.
    pub fn cache(&self) -> SharedCache {
        Arc::clone(&self.inner.cache)
    }

    // == Queue Management ==
    /// Rejects queued work, aborts running requests and drops throttled ones.
    pub fn cancel_all_pending(&self) {
        self.inner.queue.clear();
        self.inner.throttler.clear();
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.inner.queue
    }

    pub fn auth(&self) -> Option<&TokenCoordinator> {
        self.inner.auth.as_ref()
    }
}

/// Failures worth another attempt from the backoff loop. 5xx responses already
/// had their fixed-delay retry inside the attempt.
fn is_transient(err: &NetError) -> bool {
    matches!(err, NetError::Network(_) | NetError::Timeout(_))
}

impl ClientInner {
    // == Single Attempt ==
    async fn execute_once(&self, mut request: HttpRequest, authenticated: bool) -> Result<Value> {
        let auth = self.auth.as_ref().filter(|_| authenticated);
        let mut token = None;
        if let Some(auth) = auth {
            let current = auth.access_token().await?;
            request = request.with_bearer(&current)?;
            token = Some(current);
        }

        let mut response = self.transport.send(request.clone()).await?;

        if response.status == StatusCode::UNAUTHORIZED {
            if let (Some(auth), Some(rejected)) = (auth, token.as_deref()) {
                let fresh = auth.refresh_after_unauthorized(rejected).await?;
                request = request.with_bearer(&fresh)?;
                debug!(path = %request.path, "replaying request with refreshed token");
                response = self.transport.send(request.clone()).await?;
            }
        }

        if response.status.is_server_error() {
            warn!(
                path = %request.path,
                status = response.status.as_u16(),
                delay_ms = self.server_retry_delay.as_millis() as u64,
                "server error, retrying once"
            );
            sleep(self.server_retry_delay).await;
            response = self.transport.send(request).await?;
        }

        Ok(response.error_for_status()?.data)
    }
}

// == Builder ==
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    cache: Option<TtlCache<Value>>,
    queue: Option<RequestQueue>,
    throttler: Option<Throttler>,
    auth: Option<TokenCoordinator>,
    retry: RetryPolicy,
    server_retry_delay: Duration,
}

impl ClientBuilder {
    pub fn cache(mut self, cache: TtlCache<Value>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn queue(mut self, queue: RequestQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn throttler(mut self, throttler: Throttler) -> Self {
        self.throttler = Some(throttler);
        self
    }

    /// Without a coordinator requests go out without credentials.
    pub fn auth(mut self, auth: TokenCoordinator) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn server_retry_delay(mut self, delay: Duration) -> Self {
        self.server_retry_delay = delay;
        self
    }

    pub fn build(self) -> HttpClient {
        let cache = self
            .cache
            .unwrap_or_else(|| TtlCache::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL));
        HttpClient {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                cache: Arc::new(RwLock::new(cache)),
                queue: self.queue.unwrap_or_default(),
                throttler: self.throttler.unwrap_or_default(),
                auth: self.auth,
                retry: self.retry,
                server_retry_delay: self.server_retry_delay,
            }),
        }
    }
}

// == Process-wide Default ==
static DEFAULT_CLIENT: OnceLock<HttpClient> = OnceLock::new();

/// Installs the client used by the `http_*` functions. Fails with the given
/// client if one is already installed.
pub fn install_default(client: HttpClient) -> std::result::Result<(), HttpClient> {
    DEFAULT_CLIENT.set(client)
}

pub fn default_client() -> Option<&'static HttpClient> {
    DEFAULT_CLIENT.get()
}

fn require_default() -> ApiResult<&'static HttpClient> {
    default_client()
        .ok_or_else(|| NetError::Configuration("no default client installed".to_string()).into())
}

pub async fn http_get(path: &str, options: RequestOptions) -> ApiResult<Value> {
    require_default()?.get(path, options).await
}

pub async fn http_post(path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
    require_default()?.post(path, body, options).await
}

pub async fn http_put(path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
    require_default()?.put(path, body, options).await
}

pub async fn http_patch(path: &str, body: Option<Value>, options: RequestOptions) -> ApiResult<Value> {
    require_default()?.patch(path, body, options).await
}

pub async fn http_delete(path: &str, options: RequestOptions) -> ApiResult<Value> {
    require_default()?.delete(path, options).await
}
