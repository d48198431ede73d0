//! One-shot timers: the delay capability.
//!
//! A [`Timer`] is a [`Deferred`] that a [`TimerDriverHandle`] completes once
//! its timeout elapses. It is created uninitialized and started with
//! [`init`](Timer::init); [`abort`](Timer::abort) cancels a pending timer
//! without settling it.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;

use super::driver::{TimerDriverHandle, TimerHandle};
use crate::error::{Error, Result};
use crate::sync::Deferred;
use crate::tracing_compat::debug;

/// Something that can hand out timers.
pub trait Delay {
    /// Returns a timer that completes after `timeout`.
    fn delay(&self, timeout: Duration) -> Timer;
}

impl Delay for TimerDriverHandle {
    fn delay(&self, timeout: Duration) -> Timer {
        let timer = Timer::new(self);
        // A fresh timer is never initialized, so this cannot fail.
        let _ = timer.init(timeout);
        timer
    }
}

impl<D: Delay + ?Sized> Delay for &D {
    fn delay(&self, timeout: Duration) -> Timer {
        (**self).delay(timeout)
    }
}

impl<D: Delay + ?Sized> Delay for Arc<D> {
    fn delay(&self, timeout: Duration) -> Timer {
        (**self).delay(timeout)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    timeout: Option<Duration>,
    registration: Option<TimerHandle>,
}

/// A deferred value completed by the timer driver.
///
/// Clones share the same timer.
#[derive(Clone)]
pub struct Timer {
    deferred: Deferred<(), Infallible>,
    driver: TimerDriverHandle,
    state: Arc<Mutex<TimerState>>,
}

impl Timer {
    /// Creates an uninitialized timer bound to `driver`.
    #[must_use]
    pub fn new(driver: &TimerDriverHandle) -> Self {
        Self {
            deferred: Deferred::new(),
            driver: driver.clone(),
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Starts the timer.
    ///
    /// A zero timeout completes the timer immediately. A timer can be
    /// initialized once; a second call fails with
    /// [`Error::TimerAlreadyInitialized`].
    pub fn init(&self, timeout: Duration) -> Result<&Self> {
        let mut state = self.state.lock();
        if let Some(previous) = state.timeout {
            return Err(Error::TimerAlreadyInitialized(previous));
        }
        state.timeout = Some(timeout);
        if timeout.is_zero() {
            drop(state);
            self.deferred.complete(());
        } else {
            let deadline = self.driver.now().saturating_add(timeout);
            state.registration = Some(self.driver.register(deadline, self.deferred.completer()));
        }
        Ok(self)
    }

    /// Cancels a pending timer without settling it.
    ///
    /// Awaiting an aborted timer never completes unless someone completes
    /// its [`deferred`](Self::deferred) value directly.
    pub fn abort(&self) {
        let registration = self.state.lock().registration.take();
        if let Some(handle) = registration {
            if self.driver.cancel(handle) {
                debug!(id = handle.id(), "timer aborted");
            }
        }
    }

    /// Returns the configured timeout, if initialized.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Returns true once the timer has fired.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.deferred.is_settled()
    }

    /// Returns the underlying deferred value, for chaining.
    #[must_use]
    pub fn deferred(&self) -> &Deferred<(), Infallible> {
        &self.deferred
    }

    /// Derives a value computed once the timer fires. The result can still
    /// abort this timer and reports its timeout.
    pub fn map<U, F>(&self, f: F) -> MappedTimer<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce() -> U + Send + 'static,
    {
        MappedTimer {
            timer: self.clone(),
            deferred: self.deferred.map(move |()| f()),
        }
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.deferred).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            Poll::Ready(Err(never)) => match never {},
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("timeout", &self.timeout())
            .field("state", &self.deferred.state())
            .finish_non_exhaustive()
    }
}

/// A [`Timer`] followed by a transformation of its completion.
#[derive(Clone)]
pub struct MappedTimer<U> {
    timer: Timer,
    deferred: Deferred<(), Infallible, U>,
}

impl<U> MappedTimer<U>
where
    U: Clone + Send + 'static,
{
    /// Cancels the timer this value waits on.
    pub fn abort(&self) {
        self.timer.abort();
    }

    /// Timeout of the underlying timer.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timer.timeout()
    }

    /// Returns true once the timer has fired and the value is computed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.deferred.is_settled()
    }

    /// Returns the computed value, if ready.
    #[must_use]
    pub fn value(&self) -> Option<U> {
        self.deferred.outcome().map(|outcome| match outcome {
            Ok(value) => value,
            Err(never) => match never {},
        })
    }

    /// Chains another transformation onto the same timer.
    pub fn map<V, F>(&self, f: F) -> MappedTimer<V>
    where
        V: Clone + Send + 'static,
        F: FnOnce(U) -> V + Send + 'static,
    {
        MappedTimer {
            timer: self.timer.clone(),
            deferred: self.deferred.map(f),
        }
    }
}

impl<U: Clone> Future for MappedTimer<U> {
    type Output = U;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.deferred).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(never)) => match never {},
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<U> fmt::Debug for MappedTimer<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedTimer")
            .field("timer", &self.timer)
            .field("state", &self.deferred.state())
            .finish()
    }
}

/// Creates and starts a timer that completes after `timeout`.
pub fn timer<D: Delay + ?Sized>(delay: &D, timeout: Duration) -> Timer {
    delay.delay(timeout)
}
