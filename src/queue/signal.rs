//! Abort signalling between the queue and running operations.

use tokio::sync::watch;

/// Raises the abort flag for one running operation.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

/// Observes the abort flag. Operations may poll it or await it; the queue
/// stops waiting for them once it is raised either way.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a linked controller/signal pair.
pub fn abort_pair() -> (AbortController, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortController { tx }, AbortSignal { rx })
}

impl AbortController {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is raised. Never resolves if the controller is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_abort_wakes_waiter() {
        let (controller, signal) = abort_pair();
        let mut waiter = signal.clone();
        let mut fut = task::spawn(async move { waiter.aborted().await });

        assert_pending!(fut.poll());
        controller.abort();
        assert!(fut.is_woken());
        assert_ready!(fut.poll());
        assert!(signal.is_aborted());
        assert!(controller.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_controller_never_aborts() {
        let (controller, mut signal) = abort_pair();
        drop(controller);

        let waited = tokio::time::timeout(Duration::from_secs(1), signal.aborted()).await;
        assert!(waited.is_err());
        assert!(!signal.is_aborted());
    }
}
