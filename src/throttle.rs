//! Request Throttler
//!
//! Runs queued operations one at a time, spacing consecutive starts by at least
//! a fixed interval. This bounds request rate for endpoints that enforce one.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::error::{NetError, Result};

/// Spacing used by `Throttler::default()`
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type Job = Box<dyn FnOnce() -> BoxFuture + Send>;

#[derive(Default)]
struct ThrottleState {
    queue: VecDeque<Job>,
    draining: bool,
    last_start: Option<Instant>,
}

struct Inner {
    state: Mutex<ThrottleState>,
    min_interval: Duration,
}

// == Throttler ==
/// Cloneable handle to a shared FIFO throttler.
#[derive(Clone)]
pub struct Throttler {
    inner: Arc<Inner>,
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("min_interval", &self.inner.min_interval)
            .field("queued", &self.len())
            .finish()
    }
}

impl Throttler {
    /// Creates an idle throttler.
    ///
    /// # Arguments
    /// * `min_interval` - Minimum gap between the starts of two operations
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ThrottleState::default()),
                min_interval,
            }),
        }
    }

    // == Add ==
    /// Appends `operation` and waits for its outcome.
    ///
    /// The operation's own error is returned here and nowhere else; the drain
    /// loop moves on either way. If the operation is discarded by `clear`
    /// before it starts, the caller sees `Cancelled`.
    pub async fn add<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || -> BoxFuture {
            Box::pin(async move {
                let _ = tx.send(operation().await);
            })
        });

        let start_drain = {
            let mut state = self.inner.lock();
            state.queue.push_back(job);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }

        rx.await.unwrap_or(Err(NetError::Cancelled))
    }

    // == Clear ==
    /// Drops every operation that has not started yet.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.lock();
            std::mem::take(&mut state.queue)
        };
        debug!(dropped = dropped.len(), "throttle queue cleared");
    }

    /// Number of operations waiting to start.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs queued jobs sequentially until the queue is empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let last_start = self.lock().last_start;
            if let Some(last) = last_start {
                match last.checked_add(self.min_interval) {
                    Some(at) => sleep_until(at).await,
                    None => sleep(self.min_interval).await,
                }
            }

            // Re-check after the wait: `clear` may have emptied the queue.
            let job = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(job) => {
                        state.last_start = Some(Instant::now());
                        job
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            debug!("throttled request started");
            // A panicking job is isolated in its own task
            let _ = tokio::spawn(job()).await;
        }
    }
}
