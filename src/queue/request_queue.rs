//! Priority Request Queue
//!
//! Admits async operations tagged with a priority and runs at most
//! `max_concurrent` of them at once. Each running operation gets its own task,
//! a deadline and an abort signal.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{NetError, Result};
use crate::queue::{abort_pair, AbortController, AbortSignal, Priority};

/// Concurrency bound used by `RequestQueue::default()`
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Per-operation deadline used when the caller does not pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased queued work. `Run` starts it; `Reject` settles it without running.
type Job = Box<dyn FnOnce(Dispatch) -> BoxFuture<Settled> + Send>;

enum Dispatch {
    Run {
        signal: AbortSignal,
        timeout: Duration,
    },
    Reject(NetError),
}

/// How a running operation left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Finished,
    TimedOut,
    Aborted,
    Rejected,
}

struct Pending {
    id: u64,
    priority: Priority,
    timeout: Duration,
    job: Job,
}

#[derive(Default)]
struct QueueState {
    /// Sorted by priority, FIFO within a priority
    pending: VecDeque<Pending>,
    running: HashMap<u64, AbortController>,
}

impl QueueState {
    /// Inserts before the first item of strictly lower priority.
    fn insert(&mut self, item: Pending) {
        let index = self
            .pending
            .iter()
            .position(|queued| queued.priority > item.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, item);
    }
}

struct Inner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    default_timeout: Duration,
    next_id: AtomicU64,
}

// == Request Queue ==
/// Cloneable handle to a shared priority queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("pending", &self.pending())
            .field("active", &self.active())
            .finish()
    }
}

impl RequestQueue {
    /// Creates a queue. `max_concurrent` is clamped to at least 1.
    ///
    /// # Arguments
    /// * `max_concurrent` - How many operations may run at once
    /// * `default_timeout` - Deadline for items enqueued without their own,
    ///   measured from when the item starts running
    pub fn new(max_concurrent: usize, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                max_concurrent: max_concurrent.max(1),
                default_timeout,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // == Enqueue ==
    /// Queues `operation` with the default timeout.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime; scheduling spawns tasks.
    pub fn enqueue<T, F, Fut>(&self, priority: Priority, operation: F) -> QueueTicket<T>
    where
        T: Send + 'static,
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.enqueue_with_timeout(priority, self.inner.default_timeout, operation)
    }

    /// Queues `operation` with an explicit deadline measured from its start.
    pub fn enqueue_with_timeout<T, F, Fut>(
        &self,
        priority: Priority,
        timeout: Duration,
        operation: F,
    ) -> QueueTicket<T>
    where
        T: Send + 'static,
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move |dispatch| -> BoxFuture<Settled> {
            match dispatch {
                Dispatch::Run { signal, timeout } => {
                    Box::pin(run_operation(operation, signal, timeout, tx))
                }
                Dispatch::Reject(err) => {
                    let _ = tx.send(Err(err));
                    Box::pin(async { Settled::Rejected })
                }
            }
        });

        {
            let mut state = self.inner.lock();
            state.insert(Pending {
                id,
                priority,
                timeout,
                job,
            });
            debug!(id, priority = priority.as_str(), pending = state.pending.len(), "request queued");
        }
        self.inner.schedule();

        QueueTicket {
            id,
            rx,
            queue: Arc::downgrade(&self.inner),
        }
    }

    // == Clear ==
    /// Rejects every queued item with `QueueCleared` and aborts every running one.
    pub fn clear(&self) {
        let (rejected, aborted) = {
            let mut state = self.inner.lock();
            for controller in state.running.values() {
                controller.abort();
            }
            let aborted = state.running.len();
            (state.pending.drain(..).collect::<Vec<_>>(), aborted)
        };

        debug!(rejected = rejected.len(), aborted, "request queue cleared");
        for item in rejected {
            drop((item.job)(Dispatch::Reject(NetError::QueueCleared)));
        }
    }

    /// Number of operations waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of operations currently holding a slot.
    pub fn active(&self) -> usize {
        self.inner.lock().running.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Defers a dispatch pass to a fresh task so settle paths never recurse.
    fn schedule(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.dispatch() });
    }

    /// Starts the highest-priority oldest items while slots are free.
    fn dispatch(self: &Arc<Self>) {
        let started = {
            let mut state = self.lock();
            let mut started = Vec::new();
            while state.running.len() < self.max_concurrent {
                let Some(item) = state.pending.pop_front() else {
                    break;
                };
                let (controller, signal) = abort_pair();
                state.running.insert(item.id, controller);
                started.push((item, signal));
            }
            started
        };

        for (item, signal) in started {
            let guard = SlotGuard {
                inner: Arc::clone(self),
                id: item.id,
            };
            debug!(id = item.id, priority = item.priority.as_str(), "request started");
            let run = (item.job)(Dispatch::Run {
                signal,
                timeout: item.timeout,
            });
            tokio::spawn(async move {
                let settled = run.await;
                guard.release(settled);
            });
        }
    }

    fn cancel(self: &Arc<Self>, id: u64) {
        let queued = {
            let mut state = self.lock();
            match state.pending.iter().position(|item| item.id == id) {
                Some(index) => state.pending.remove(index),
                None => {
                    if let Some(controller) = state.running.get(&id) {
                        debug!(id, "aborting running request");
                        controller.abort();
                    }
                    None
                }
            }
        };

        if let Some(item) = queued {
            debug!(id, "queued request cancelled before start");
            drop((item.job)(Dispatch::Reject(NetError::Cancelled)));
        }
    }
}

/// Releases a slot on every exit path, including a panicking operation.
struct SlotGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl SlotGuard {
    fn release(self, settled: Settled) {
        if settled == Settled::TimedOut {
            if let Some(controller) = self.inner.lock().running.get(&self.id) {
                controller.abort();
            }
        }
        debug!(id = self.id, ?settled, "request settled");
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.lock().running.remove(&self.id);
        if tokio::runtime::Handle::try_current().is_ok() {
            self.inner.schedule();
        }
    }
}

async fn run_operation<T, F, Fut>(
    operation: F,
    signal: AbortSignal,
    timeout: Duration,
    tx: oneshot::Sender<Result<T>>,
) -> Settled
where
    F: FnOnce(AbortSignal) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut watcher = signal.clone();
    let (outcome, settled) = tokio::select! {
        biased;
        _ = watcher.aborted() => (Err(NetError::Cancelled), Settled::Aborted),
        result = tokio::time::timeout(timeout, operation(signal)) => match result {
            Ok(outcome) => (outcome, Settled::Finished),
            Err(_) => {
                let ms = timeout.as_millis() as u64;
                warn!(timeout_ms = ms, "queued request timed out");
                (Err(NetError::Timeout(ms)), Settled::TimedOut)
            }
        },
    };
    let _ = tx.send(outcome);
    settled
}

// == Queue Ticket ==
/// Handle to one queued operation. Await it for the result.
///
/// Dropping the ticket does not cancel the work; call `cancel` for that.
pub struct QueueTicket<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T>>,
    queue: Weak<Inner>,
}

impl<T> QueueTicket<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the operation whether it is still queued or already running.
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Detached canceller usable after the ticket has been moved into an `.await`.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            queue: self.queue.clone(),
        }
    }
}

impl<T> Future for QueueTicket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the operation task died without reporting.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(NetError::Cancelled)))
    }
}

impl<T> std::fmt::Debug for QueueTicket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTicket").field("id", &self.id).finish()
    }
}

/// Cancels one queued operation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: u64,
    queue: Weak<Inner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(inner) = self.queue.upgrade() {
            inner.cancel(self.id);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let queue = RequestQueue::new(1, DEFAULT_TIMEOUT);
        let order = recorder();

        let mut tickets = Vec::new();
        for (label, priority) in [
            ("low", Priority::Low),
            ("high-1", Priority::High),
            ("normal", Priority::Normal),
            ("high-2", Priority::High),
        ] {
            let order = order.clone();
            tickets.push(queue.enqueue(priority, move |_| async move {
                order.lock().unwrap().push(label);
                Ok(())
            }));
        }
        for ticket in tickets {
            ticket.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high-1", "high-2", "normal", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let queue = RequestQueue::new(2, DEFAULT_TIMEOUT);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tickets: Vec<_> = (0..5)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                queue.enqueue(Priority::Normal, move |_| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for ticket in tickets {
            ticket.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.active(), 0);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_operation_error_propagates() {
        let queue = RequestQueue::default();
        let ticket = queue.enqueue(Priority::Normal, |_| async {
            Err::<(), _>(NetError::Network("connection reset".to_string()))
        });

        let err = ticket.await.unwrap_err();
        assert!(matches!(err, NetError::Network(msg) if msg == "connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot_and_raises_abort() {
        let queue = RequestQueue::new(1, Duration::from_millis(50));
        let (seen_tx, seen_rx) = oneshot::channel();

        let slow = queue.enqueue(Priority::Normal, move |mut signal| async move {
            // Hand the signal out so the test can observe the abort.
            let watcher = signal.clone();
            let _ = seen_tx.send(watcher);
            signal.aborted().await;
            Ok(())
        });
        let next = queue.enqueue(Priority::Normal, |_| async { Ok(7) });

        assert!(matches!(slow.await, Err(NetError::Timeout(50))));
        assert_eq!(next.await.unwrap(), 7);

        let watcher = seen_rx.await.unwrap();
        assert!(watcher.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_timeout_override() {
        let queue = RequestQueue::new(1, Duration::from_secs(30));
        let ticket = queue.enqueue_with_timeout(Priority::Low, Duration::from_millis(10), |_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        });

        assert!(matches!(ticket.await, Err(NetError::Timeout(10))));
    }

    #[tokio::test]
    async fn test_cancel_queued_never_runs() {
        let queue = RequestQueue::new(1, DEFAULT_TIMEOUT);
        let gate = Arc::new(Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker = {
            let gate = gate.clone();
            queue.enqueue(Priority::High, move |_| async move {
                gate.notified().await;
                Ok(())
            })
        };
        let victim = {
            let ran = ran.clone();
            queue.enqueue(Priority::Normal, move |_| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        victim.cancel();
        assert!(matches!(victim.await, Err(NetError::Cancelled)));

        gate.notify_one();
        blocker.await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_running_frees_slot() {
        let queue = RequestQueue::new(1, DEFAULT_TIMEOUT);
        let (started_tx, started_rx) = oneshot::channel();

        let running = queue.enqueue(Priority::Normal, move |_| async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            Ok(())
        });
        let next = queue.enqueue(Priority::Normal, |_| async { Ok("next") });

        started_rx.await.unwrap();
        let cancel = running.cancel_handle();
        cancel.cancel();

        assert!(matches!(running.await, Err(NetError::Cancelled)));
        assert_eq!(next.await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_clear_rejects_queued_and_aborts_running() {
        let queue = RequestQueue::new(1, DEFAULT_TIMEOUT);
        let (started_tx, started_rx) = oneshot::channel();

        let running = queue.enqueue(Priority::Normal, move |_| async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            Ok(())
        });
        let queued = queue.enqueue(Priority::Normal, |_| async { Ok(()) });

        started_rx.await.unwrap();
        queue.clear();

        assert!(matches!(queued.await, Err(NetError::QueueCleared)));
        assert!(matches!(running.await, Err(NetError::Cancelled)));
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_slot() {
        let queue = RequestQueue::new(1, DEFAULT_TIMEOUT);

        let bad = queue.enqueue(Priority::Normal, |_| async {
            if true {
                panic!("operation blew up");
            }
            Ok(())
        });
        let good = queue.enqueue(Priority::Normal, |_| async { Ok(1) });

        assert!(matches!(bad.await, Err(NetError::Cancelled)));
        assert_eq!(good.await.unwrap(), 1);
    }
}
