//! Event Bus
//!
//! Typed publish/subscribe keyed by event name. A failing handler is logged and
//! never prevents the remaining handlers from running.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    handlers: HashMap<String, Vec<(u64, Handler<E>)>>,
}

struct BusInner<E> {
    registry: Mutex<Registry<E>>,
    next_id: AtomicU64,
}

impl<E> BusInner<E> {
    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, event: &str, id: u64) {
        let mut registry = self.lock();
        if let Some(list) = registry.handlers.get_mut(event) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                registry.handlers.remove(event);
            }
        }
    }
}

// == Event Bus ==
/// Cloneable handle to a shared bus carrying payloads of type `E`.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("EventBus")
            .field("events", &registry.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry {
                    handlers: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // == Subscribe ==
    /// Registers `handler` for `event`. The handler stays registered until the
    /// returned subscription is unsubscribed or dropped.
    ///
    /// # Returns
    /// A guard that removes this handler, and only this one.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        let event = event.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .handlers
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(&event, id);
                }
            })),
        }
    }

    // == Publish ==
    /// Delivers `payload` to every handler of `event` and returns how many
    /// completed without panicking.
    pub fn publish(&self, event: &str, payload: &E) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<Handler<E>> = match self.inner.lock().handlers.get(event) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event, "event handler panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .handlers
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

// == Subscription ==
/// Registration guard returned by `EventBus::subscribe`.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.run();
    }

    /// Keeps the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_reaches_matching_handlers_only() {
        let bus: EventBus<u32> = EventBus::new();
        let sales = Arc::new(AtomicUsize::new(0));
        let views = Arc::new(AtomicUsize::new(0));

        let s = sales.clone();
        let _sales_sub = bus.subscribe("sale", move |amount| {
            s.fetch_add(*amount as usize, Ordering::SeqCst);
        });
        let v = views.clone();
        let _views_sub = bus.subscribe("view", move |_| {
            v.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish("sale", &5), 1);
        assert_eq!(bus.publish("sale", &7), 1);
        assert_eq!(bus.publish("unknown", &1), 0);

        assert_eq!(sales.load(Ordering::SeqCst), 12);
        assert_eq!(views.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let bus: EventBus<()> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let sub = bus.subscribe("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish("tick", &());
        sub.unsubscribe();
        bus.publish("tick", &());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        {
            let _scoped = bus.subscribe("tick", |_| {});
            assert_eq!(bus.subscriber_count("tick"), 1);
        }
        assert_eq!(bus.subscriber_count("tick"), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let bus: EventBus<()> = EventBus::new();
        bus.subscribe("tick", |_| {}).detach();
        assert_eq!(bus.subscriber_count("tick"), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus: EventBus<&'static str> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe("update", |_| panic!("handler failure"));
        let c = calls.clone();
        let _good = bus.subscribe("update", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish("update", &"payload"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus: EventBus<()> = EventBus::new();
        let sub = bus.subscribe("tick", |_| {});
        drop(bus);
        sub.unsubscribe();
    }
}
