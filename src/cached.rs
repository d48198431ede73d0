//! Time-bounded memoization of keyed lookups.
//!
//! [`Cached`] remembers what a getter returned for each key for `max_age`.
//! The getter yields a [`Deferred`]: one that is already completed is stored
//! at once; one still in flight is stored as-is, so concurrent callers share
//! the same request, and replaced by the value once it completes. A request
//! that fails while in flight stays cached until it ages out; one that fails
//! immediately is not stored.
//!
//! Expired entries are not removed on a timer. Each store checks whether the
//! oldest tracked timestamp has left the window and, if so, sweeps the map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Failure;
use crate::sync::Deferred;
use crate::time::TimeSource;
use crate::tracing_compat::trace;

type Getter<T, E> = Box<dyn Fn(&str) -> Deferred<T, E> + Send + Sync>;

enum Entry<T, E> {
    Ready { value: T, stamp: Duration },
    InFlight { request: Deferred<T, E>, stamp: Duration },
}

impl<T, E> Entry<T, E> {
    fn stamp(&self) -> Duration {
        match self {
            Self::Ready { stamp, .. } | Self::InFlight { stamp, .. } => *stamp,
        }
    }
}

struct Store<T, E> {
    entries: HashMap<String, Entry<T, E>>,
    oldest: Option<Duration>,
}

struct Shared<T, E> {
    max_age: Duration,
    clock: Arc<dyn TimeSource>,
    store: Mutex<Store<T, E>>,
}

impl<T, E> Shared<T, E> {
    fn is_fresh(&self, stamp: Duration, now: Duration) -> bool {
        stamp.saturating_add(self.max_age) >= now
    }

    fn track(store: &mut Store<T, E>, stamp: Duration) {
        if store.oldest.is_none_or(|oldest| stamp < oldest) {
            store.oldest = Some(stamp);
        }
    }

    fn sweep(&self, store: &mut Store<T, E>, now: Duration) {
        store
            .entries
            .retain(|_, entry| entry.stamp().saturating_add(self.max_age) >= now);
        store.oldest = store.entries.values().map(Entry::stamp).min();
        trace!(kept = store.entries.len(), "cache swept");
    }

    /// Stores a completed value stamped with the current time.
    fn store_value(&self, id: String, value: T) {
        let now = self.clock.now();
        let mut store = self.store.lock();
        if store.oldest.is_some_and(|oldest| !self.is_fresh(oldest, now)) {
            self.sweep(&mut store, now);
        }
        Self::track(&mut store, now);
        store.entries.insert(id, Entry::Ready { value, stamp: now });
    }
}

/// Caches getter results per key for a fixed maximum age.
pub struct Cached<T, E = Failure> {
    shared: Arc<Shared<T, E>>,
    getter: Getter<T, E>,
}

impl<T, E> Cached<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a cache whose entries stay valid for `max_age` on `clock`.
    pub fn new<F>(max_age: Duration, clock: Arc<dyn TimeSource>, getter: F) -> Self
    where
        F: Fn(&str) -> Deferred<T, E> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                max_age,
                clock,
                store: Mutex::new(Store {
                    entries: HashMap::new(),
                    oldest: None,
                }),
            }),
            getter: Box::new(getter),
        }
    }

    /// Returns the cached value for `id`, calling the getter when there is no
    /// fresh entry or when `force_refresh` is set.
    pub fn get(&self, id: &str, force_refresh: bool) -> Deferred<T, E> {
        let now = self.shared.clock.now();

        if !force_refresh {
            let store = self.shared.store.lock();
            match store.entries.get(id) {
                Some(Entry::Ready { value, stamp }) if self.shared.is_fresh(*stamp, now) => {
                    return Deferred::completed(value.clone());
                }
                Some(Entry::InFlight { request, stamp }) if self.shared.is_fresh(*stamp, now) => {
                    return request.clone();
                }
                _ => {}
            }
        }

        trace!(id, force_refresh, "cache miss");
        let request = (self.getter)(id);
        match request.outcome() {
            Some(Ok(value)) => self.shared.store_value(id.to_owned(), value),
            // Failed lookups that settle immediately are not stored.
            Some(Err(_)) => {}
            None => self.track_in_flight(id, &request, now),
        }
        request
    }

    fn track_in_flight(&self, id: &str, request: &Deferred<T, E>, now: Duration) {
        {
            let mut store = self.shared.store.lock();
            Shared::track(&mut store, now);
            store.entries.insert(
                id.to_owned(),
                Entry::InFlight {
                    request: request.clone(),
                    stamp: now,
                },
            );
        }
        let weak: Weak<Shared<T, E>> = Arc::downgrade(&self.shared);
        let id = id.to_owned();
        request.on_settle(move |outcome| {
            if let (Ok(value), Some(shared)) = (outcome, weak.upgrade()) {
                shared.store_value(id, value);
            }
        });
    }

    /// Number of entries, stale ones not yet swept included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.store.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the oldest tracked entry.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<Duration> {
        self.shared.store.lock().oldest
    }

    /// Maximum age of a usable entry.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.shared.max_age
    }
}

impl<T, E> fmt::Debug for Cached<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.shared.store.lock();
        f.debug_struct("Cached")
            .field("max_age", &self.shared.max_age)
            .field("entries", &store.entries.len())
            .field("oldest", &store.oldest)
            .finish_non_exhaustive()
    }
}
