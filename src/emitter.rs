//! Listener registry with snapshot emission.
//!
//! Listeners are identified by their `Arc` allocation: adding the same
//! `Arc` twice registers it once, and removal matches by pointer.
//! [`emit`](Emitter::emit) calls the listeners registered when it started, so
//! a listener may add or remove listeners (itself included) while running.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::tracing_compat::trace;

/// A registered callback.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

type Registry<A> = Mutex<Vec<Listener<A>>>;

/// Broadcasts values of type `A` to every connected listener.
///
/// ```
/// use coopsync::emitter::{Emitter, Listener};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let total = Arc::new(AtomicU32::new(0));
/// let emitter = Emitter::<u32>::new();
/// let sum = Arc::clone(&total);
/// let listener: Listener<u32> = Arc::new(move |v: &u32| {
///     sum.fetch_add(*v, Ordering::Relaxed);
/// });
/// let subscription = emitter.add_listener(listener);
/// emitter.emit(&5);
/// subscription.unsubscribe();
/// emitter.emit(&5);
/// assert_eq!(total.load(Ordering::Relaxed), 5);
/// ```
pub struct Emitter<A> {
    listeners: Arc<Registry<A>>,
}

impl<A> Emitter<A> {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connects `listener` unless it is already connected.
    ///
    /// The returned [`Subscription`] disconnects it again; dropping the
    /// subscription leaves the listener connected.
    pub fn add_listener(&self, listener: Listener<A>) -> Subscription<A> {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(Arc::clone(&listener));
            trace!(count = listeners.len(), "listener added");
        }
        drop(listeners);
        Subscription {
            registry: Arc::downgrade(&self.listeners),
            listener,
        }
    }

    /// Calls every listener connected at the time of the call, in
    /// registration order.
    pub fn emit(&self, args: &A) {
        let snapshot = self.listeners.lock().clone();
        for listener in &snapshot {
            listener(args);
        }
    }

    /// Disconnects `listener`, if connected. Returns true if it was.
    pub fn remove_listener(&self, listener: &Listener<A>) -> bool {
        remove(&self.listeners, listener)
    }

    /// Disconnects every listener.
    pub fn remove_all_listeners(&self) {
        self.listeners.lock().clear();
    }

    /// Returns true if any listener is connected.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Returns a snapshot of the connected listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<Listener<A>> {
        self.listeners.lock().clone()
    }
}

fn remove<A>(registry: &Registry<A>, listener: &Listener<A>) -> bool {
    let mut listeners = registry.lock();
    match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
        Some(idx) => {
            listeners.remove(idx);
            trace!(count = listeners.len(), "listener removed");
            true
        }
        None => false,
    }
}

impl<A> Default for Emitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Handle returned by [`Emitter::add_listener`].
pub struct Subscription<A> {
    registry: Weak<Registry<A>>,
    listener: Listener<A>,
}

impl<A> Subscription<A> {
    /// Disconnects the listener. A no-op if it was already removed or the
    /// emitter is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, &self.listener);
        }
    }

    /// Returns the subscribed listener.
    #[must_use]
    pub fn listener(&self) -> &Listener<A> {
        &self.listener
    }
}

impl<A> fmt::Debug for Subscription<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("emitter_alive", &(self.registry.strong_count() > 0))
            .finish_non_exhaustive()
    }
}
