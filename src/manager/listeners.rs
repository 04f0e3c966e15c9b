//! Observer registries for status and message listeners.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::identifiers::ListenerId;

// ============================================================================
// Types
// ============================================================================

/// Registered callback.
type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Deferred removal captured by a [`Subscription`].
type Remover = Box<dyn FnOnce() -> bool + Send>;

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Set of callbacks notified synchronously, in registration order.
///
/// Emission snapshots the set first, so a listener may register or remove
/// listeners (including itself) while being called.
pub struct ListenerRegistry<E> {
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E: 'static> ListenerRegistry<E> {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` and returns its unsubscribe handle.
    pub fn add<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.lock().push((id, Arc::new(listener)));

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription {
            id,
            remover: Mutex::new(Some(Box::new(move || {
                registry
                    .upgrade()
                    .is_some_and(|registry| registry.remove(id))
            }))),
        }
    }

    /// Removes the listener registered under `id`.
    ///
    /// Returns `false` if it was already removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Calls every registered listener with `event`.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }
}

impl<E> ListenerRegistry<E> {
    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned when registering a listener.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: ListenerId,
    remover: Mutex<Option<Remover>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.remover.lock().is_some())
            .finish()
    }
}

impl Subscription {
    /// Returns the listener ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Further calls do nothing.
    ///
    /// Returns `true` if this call removed it.
    pub fn unsubscribe(&self) -> bool {
        let remover = self.remover.lock().take();
        remover.is_some_and(|remove| remove())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(registry: &Arc<ListenerRegistry<u32>>) -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (subscription, count)
    }

    #[test]
    fn test_emit_reaches_all_in_order() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            let _ = registry.add(move |event: &u32| seen.lock().push((tag, *event)));
        }

        registry.emit(&7);
        assert_eq!(seen.lock().as_slice(), &[("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let (subscription, count) = counting(&registry);

        registry.emit(&1);
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        registry.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dropping_handle_keeps_listener() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let (subscription, count) = counting(&registry);
        drop(subscription);

        registry.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let handle_slot = Arc::clone(&slot);
        let counter = Arc::clone(&count);
        let subscription = registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = handle_slot.lock().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.lock() = Some(subscription);

        registry.emit(&1);
        registry.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let (subscription, _count) = counting(&registry);
        drop(registry);
        assert!(!subscription.unsubscribe());
    }
}
