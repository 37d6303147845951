//! Subscriber registry.
//!
//! Holds the callbacks that receive inbound events. The registry is
//! independent of any connection: subscribing before a connection exists is
//! fine, and nothing here can open or close a transport.
//!
//! Delivery snapshots the handler list and calls each handler without holding
//! the registry lock, so a handler may subscribe or unsubscribe (itself or
//! others) while it runs. A handler removed during a delivery is not called
//! for the remainder of that delivery.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

type Handler<T> = Arc<Mutex<dyn FnMut(&T) + Send>>;

struct Registry<T: ?Sized> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

impl<T: ?Sized> Registry<T> {
    fn contains(&self, id: u64) -> bool {
        self.handlers.iter().any(|(h, _)| *h == id)
    }
}

fn lock<U: ?Sized>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    // A panicking handler must not take the whole registry down with it.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered set of event handlers.
///
/// Cheap to clone; clones share the same set.
pub struct Subscribers<T: ?Sized> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T: ?Sized> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: ?Sized> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

impl<T: ?Sized> Subscribers<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 0, handlers: Vec::new() })) }
    }

    /// Register `handler` for every subsequent delivery.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        let handler: Handler<T> = Arc::new(Mutex::new(handler));
        registry.handlers.push((id, handler));

        Subscription { id, registry: Arc::downgrade(&self.inner) }
    }

    /// Call every registered handler with `event`, in registration order.
    ///
    /// Returns the number of handlers called.
    pub fn deliver(&self, event: &T) -> usize {
        let snapshot: Vec<(u64, Handler<T>)> = lock(&self.inner)
            .handlers
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !lock(&self.inner).contains(id) {
                continue;
            }
            let mut handler = lock(&handler);
            (&mut *handler)(event);
            delivered += 1;
        }
        delivered
    }

    /// Remove every handler.
    pub fn clear(&self) {
        let removed = {
            let mut registry = lock(&self.inner);
            std::mem::take(&mut registry.handlers)
        };
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "subscribers cleared");
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        lock(&self.inner).handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Subscribers::subscribe`].
///
/// Dropping the handle leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription<T: ?Sized> {
    id: u64,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T: ?Sized> Subscription<T> {
    /// Remove the handler. Returns `false` if it was already gone (cleared,
    /// or the registry itself was dropped).
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let before = registry.handlers.len();
        registry.handlers.retain(|(id, _)| *id != self.id);
        registry.handlers.len() != before
    }
}

impl<T: ?Sized> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &str| sink.lock().unwrap().push(event.to_owned()))
    }

    #[test]
    fn delivers_in_order_to_all() {
        let subscribers: Subscribers<str> = Subscribers::new();
        let (a, handler_a) = recorder();
        let (b, handler_b) = recorder();
        let _sa = subscribers.subscribe(handler_a);
        let _sb = subscribers.subscribe(handler_b);

        assert_eq!(subscribers.deliver("one"), 2);
        assert_eq!(subscribers.deliver("two"), 2);

        assert_eq!(*a.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(*b.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let subscribers: Subscribers<str> = Subscribers::new();
        let (seen, handler) = recorder();
        let subscription = subscribers.subscribe(handler);

        subscribers.deliver("before");
        assert!(subscription.unsubscribe());
        subscribers.deliver("after");

        assert_eq!(*seen.lock().unwrap(), vec!["before"]);
    }

    #[test]
    fn unsubscribe_after_clear_is_harmless() {
        let subscribers: Subscribers<str> = Subscribers::new();
        let subscription = subscribers.subscribe(|_| {});
        subscribers.clear();
        assert!(subscribers.is_empty());
        assert!(!subscription.unsubscribe());
    }

    #[test]
    fn handler_may_subscribe_during_delivery() {
        let subscribers: Subscribers<str> = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let registry = subscribers.clone();
        let counter = Arc::clone(&count);
        let _s = subscribers.subscribe(move |_| {
            let counter = Arc::clone(&counter);
            let _ = registry.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The handler added during the first delivery is not part of it.
        assert_eq!(subscribers.deliver("x"), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(subscribers.len(), 2);
    }

    #[test]
    fn handler_removed_mid_delivery_is_skipped() {
        let subscribers: Subscribers<str> = Subscribers::new();
        let registry = subscribers.clone();
        let _first = subscribers.subscribe(move |_| registry.clear());
        let (seen, handler) = recorder();
        let _second = subscribers.subscribe(handler);

        assert_eq!(subscribers.deliver("x"), 1);
        assert!(seen.lock().unwrap().is_empty());
    }
}
