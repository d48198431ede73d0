//! Manually-completable deferred values.
//!
//! A [`Deferred`] is a single-assignment future whose outcome is set from the
//! outside through [`complete`](Deferred::complete) or
//! [`fail`](Deferred::fail). Every clone of a `Deferred` observes the same
//! outcome, and any number of them may be awaited.
//!
//! # Chaining
//!
//! Transformations ([`then`](Deferred::then), [`map`](Deferred::map),
//! [`recover`](Deferred::recover), [`always`](Deferred::always)) produce a new
//! `Deferred` that settles once its parent settles and the callback has run.
//! The derived value keeps the *parent's* controller: calling `complete` on
//! any link of a chain settles the root, and the value then flows down
//! through every transformation.
//!
//! ```
//! use coopsync::sync::Deferred;
//!
//! let chained = Deferred::<String>::new().map(|s| s.len());
//! chained.complete("result".to_string());
//! assert_eq!(chained.outcome(), Some(Ok(6)));
//! ```
//!
//! # Continuations
//!
//! Callbacks run synchronously at the settlement point, in registration
//! order, with no internal lock held. A callback registered on an already
//! settled value runs immediately, unless that value is still running its
//! callbacks: it is then queued behind them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::Failure;

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Completed,
    /// Settled with an error.
    Failed,
}

type Continuation<R, E> = Box<dyn FnOnce(Result<R, E>) + Send>;

struct SlotInner<R, E> {
    outcome: Option<Result<R, E>>,
    wakers: SmallVec<[Waker; 1]>,
    continuations: Vec<Continuation<R, E>>,
    /// Set while `settle` is running continuations. Registrations made
    /// meanwhile are queued behind the ones not yet run.
    draining: bool,
}

/// The outcome cell shared by every clone of one link of a chain.
struct Slot<R, E> {
    inner: Mutex<SlotInner<R, E>>,
}

impl<R, E> Slot<R, E> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                outcome: None,
                wakers: SmallVec::new(),
                continuations: Vec::new(),
                draining: false,
            }),
        }
    }

    fn state(&self) -> DeferredState {
        match self.inner.lock().outcome {
            None => DeferredState::Pending,
            Some(Ok(_)) => DeferredState::Completed,
            Some(Err(_)) => DeferredState::Failed,
        }
    }
}

impl<R: Clone, E: Clone> Slot<R, E> {
    /// Stores the outcome if none is set yet. Returns whether this call won.
    fn settle(&self, outcome: Result<R, E>) -> bool {
        let (wakers, continuations) = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome.clone());
            inner.draining = true;
            (
                std::mem::take(&mut inner.wakers),
                std::mem::take(&mut inner.continuations),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        let mut batch = continuations;
        loop {
            for continuation in batch {
                continuation(outcome.clone());
            }
            let mut inner = self.inner.lock();
            if inner.continuations.is_empty() {
                inner.draining = false;
                break;
            }
            batch = std::mem::take(&mut inner.continuations);
        }
        true
    }

    fn subscribe(&self, continuation: Continuation<R, E>) {
        let settled = {
            let mut inner = self.inner.lock();
            match &inner.outcome {
                Some(outcome) if !inner.draining => outcome.clone(),
                _ => {
                    inner.continuations.push(continuation);
                    return;
                }
            }
        };
        continuation(settled);
    }

    fn poll_outcome(&self, cx: &Context<'_>) -> Poll<Result<R, E>> {
        let mut inner = self.inner.lock();
        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// The completion controller of a deferred chain.
///
/// A `Completer` settles the root of the chain it was taken from. It is
/// what [`Deferred::with_initializer`] hands to its initializer, and what
/// every derived link forwards `complete`/`fail` to.
pub struct Completer<T, E = Failure> {
    root: Arc<Slot<T, E>>,
}

impl<T, E> Clone for Completer<T, E> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
        }
    }
}

impl<T, E> Completer<T, E> {
    /// Returns true once the root has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.root.state() != DeferredState::Pending
    }
}

impl<T: Clone, E: Clone> Completer<T, E> {
    /// Completes the root with `value`. Returns `false` if it was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.root.settle(Ok(value))
    }

    /// Fails the root with `error`. Returns `false` if it was already settled.
    pub fn fail(&self, error: E) -> bool {
        self.root.settle(Err(error))
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("state", &self.root.state())
            .finish()
    }
}

/// A single-assignment future completed from outside.
///
/// `T` is the type accepted by [`complete`](Self::complete) (the root's value
/// type), `R` is the type this link yields when awaited, and `E` is the error
/// type shared by the chain. For a freshly created value `R = T`.
pub struct Deferred<T, E = Failure, R = T> {
    controller: Completer<T, E>,
    slot: Arc<Slot<R, E>>,
}

impl<T, E, R> Clone for Deferred<T, E, R> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> Deferred<T, E> {
    /// Creates a pending deferred value.
    #[must_use]
    pub fn new() -> Self {
        let slot = Arc::new(Slot::new());
        Self {
            controller: Completer {
                root: Arc::clone(&slot),
            },
            slot,
        }
    }

    /// Creates a pending deferred value and hands its controller to
    /// `initializer` before returning.
    pub fn with_initializer(initializer: impl FnOnce(Completer<T, E>)) -> Self {
        let deferred = Self::new();
        initializer(deferred.completer());
        deferred
    }
}

impl<T: Clone, E: Clone> Deferred<T, E> {
    /// Creates a deferred value already completed with `value`.
    pub fn completed(value: T) -> Self {
        let deferred = Self::new();
        deferred.controller.complete(value);
        deferred
    }

    /// Creates a deferred value already failed with `error`.
    pub fn failed(error: E) -> Self {
        let deferred = Self::new();
        deferred.controller.fail(error);
        deferred
    }
}

impl<T, E> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, R> Deferred<T, E, R> {
    /// Returns the state of this link.
    #[must_use]
    pub fn state(&self) -> DeferredState {
        self.slot.state()
    }

    /// Returns true once this link has settled either way.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state() != DeferredState::Pending
    }

    /// Returns true if this link settled with a value.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state() == DeferredState::Completed
    }

    /// Returns true if this link settled with an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state() == DeferredState::Failed
    }

    /// Returns the controller of the chain's root.
    #[must_use]
    pub fn completer(&self) -> Completer<T, E> {
        self.controller.clone()
    }
}

impl<T, E, R> Deferred<T, E, R>
where
    T: Clone,
    E: Clone,
{
    /// Completes the chain's root with `value`.
    ///
    /// A no-op if the root has already settled.
    pub fn complete(&self, value: T) -> &Self {
        self.controller.complete(value);
        self
    }

    /// Fails the chain's root with `error`.
    ///
    /// A no-op if the root has already settled.
    pub fn fail(&self, error: E) -> &Self {
        self.controller.fail(error);
        self
    }
}

impl<T, E, R> Deferred<T, E, R>
where
    E: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Returns a clone of the outcome, if settled.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<R, E>> {
        self.slot.inner.lock().outcome.clone()
    }

    /// Registers `callback` to run with the outcome of this link.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(Result<R, E>) + Send + 'static,
    {
        self.slot.subscribe(Box::new(callback));
    }

    /// Derives a link that settles with whichever callback matches this
    /// link's outcome. An `Err` returned by a callback becomes the derived
    /// link's failure.
    pub fn then<U, F, G>(&self, on_value: F, on_error: G) -> Deferred<T, E, U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(R) -> Result<U, E> + Send + 'static,
        G: FnOnce(E) -> Result<U, E> + Send + 'static,
    {
        let derived = self.derive::<U>();
        let downstream = Arc::clone(&derived.slot);
        self.on_settle(move |outcome| {
            let next = match outcome {
                Ok(value) => on_value(value),
                Err(error) => on_error(error),
            };
            downstream.settle(next);
        });
        derived
    }

    /// Derives a link holding `f(value)`; failures pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> Deferred<T, E, U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(R) -> U + Send + 'static,
    {
        self.then(move |value| Ok(f(value)), Err)
    }

    /// Derives a link holding the result of a fallible `f(value)`.
    pub fn and_then<U, F>(&self, f: F) -> Deferred<T, E, U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(R) -> Result<U, E> + Send + 'static,
    {
        self.then(f, Err)
    }

    /// Derives a link where a failure is replaced by the result of `f(error)`.
    pub fn recover<F>(&self, f: F) -> Self
    where
        F: FnOnce(E) -> Result<R, E> + Send + 'static,
    {
        self.then(Ok, f)
    }

    /// Derives a link that runs `f` on either outcome.
    ///
    /// If `f` fails its error replaces the outcome; otherwise the original
    /// outcome passes through.
    pub fn always<F>(&self, f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let derived = self.derive::<R>();
        let downstream = Arc::clone(&derived.slot);
        self.on_settle(move |outcome| {
            let next = match f() {
                Ok(()) => outcome,
                Err(error) => Err(error),
            };
            downstream.settle(next);
        });
        derived
    }

    fn derive<U>(&self) -> Deferred<T, E, U> {
        Deferred {
            controller: self.controller.clone(),
            slot: Arc::new(Slot::new()),
        }
    }
}

impl<T, E, R> Future for Deferred<T, E, R>
where
    R: Clone,
    E: Clone,
{
    type Output = Result<R, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_outcome(cx)
    }
}

impl<T, E, R> fmt::Debug for Deferred<T, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
