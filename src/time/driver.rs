//! Timer driver.
//!
//! The driver keeps a min-heap of `(deadline, registration)` pairs. Each
//! registration holds the completion controller of a [`Deferred`]; when
//! [`process_timers`](TimerDriver::process_timers) finds it expired, the
//! deferred value is completed. Someone has to call `process_timers`: the
//! [`LocalRuntime`](crate::runtime::LocalRuntime) does so whenever it runs out
//! of ready tasks.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::clock::{TimeSource, VirtualClock, WallClock};
use crate::sync::Completer;
use crate::tracing_compat::trace;

/// Latest deadline a registration can carry: clocks count `u64` nanoseconds.
pub const MAX_DEADLINE: Duration = Duration::from_nanos(u64::MAX);

/// Identifies a timer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Returns the registration id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Duration,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline heap. Cancelled registrations leave stale heap entries that are
/// skipped when they reach the top.
#[derive(Default)]
struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    pending: HashMap<u64, Completer<(), Infallible>>,
    next_generation: u64,
}

impl TimerHeap {
    fn insert(&mut self, deadline: Duration, completer: Completer<(), Infallible>) -> TimerHandle {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
        });
        self.pending.insert(generation, completer);
        TimerHandle(generation)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0).is_some()
    }

    fn discard_stale(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains_key(&entry.generation) {
                break;
            }
            self.heap.pop();
        }
    }

    fn peek_deadline(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Removes every registration whose deadline is `<= now`, earliest first.
    fn pop_expired(&mut self, now: Duration) -> Vec<Completer<(), Infallible>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek().copied() {
            if entry.deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(completer) = self.pending.remove(&entry.generation) {
                expired.push(completer);
            }
        }
        expired
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }
}

/// Timer driver over a [`TimeSource`].
pub struct TimerDriver {
    clock: Arc<dyn TimeSource>,
    heap: Mutex<TimerHeap>,
}

impl TimerDriver {
    /// Creates a driver reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            heap: Mutex::new(TimerHeap::default()),
        }
    }

    /// Returns the current time from the underlying clock.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Registers `completer` to be completed once `deadline` has passed.
    ///
    /// Deadlines past [`MAX_DEADLINE`] are clamped to it.
    pub fn register(&self, deadline: Duration, completer: Completer<(), Infallible>) -> TimerHandle {
        let deadline = deadline.min(MAX_DEADLINE);
        let handle = self.heap.lock().insert(deadline, completer);
        trace!(id = handle.0, deadline_ns = deadline.as_nanos() as u64, "timer registered");
        handle
    }

    /// Cancels a registration without completing it.
    ///
    /// Returns true if the registration was still pending.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let cancelled = self.heap.lock().cancel(handle);
        trace!(id = handle.0, cancelled, "timer cancelled");
        cancelled
    }

    /// Returns the earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap.lock().peek_deadline()
    }

    /// Completes every expired registration. Returns how many fired.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();
        // Complete outside the lock: continuations may register new timers.
        let expired = self.heap.lock().pop_expired(now);
        let fired = expired.len();
        for completer in expired {
            completer.complete(());
        }
        if fired > 0 {
            trace!(fired, now_ns = now.as_nanos() as u64, "timers fired");
        }
        fired
    }

    /// Returns the number of pending registrations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.heap.lock().pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Drops every registration without completing it.
    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("clock", &self.clock)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Shared handle to a [`TimerDriver`].
#[derive(Clone, Debug)]
pub struct TimerDriverHandle {
    driver: Arc<TimerDriver>,
}

impl TimerDriverHandle {
    /// Wraps a driver.
    #[must_use]
    pub fn new(driver: TimerDriver) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Driver over a fresh wall clock.
    #[must_use]
    pub fn wall() -> Self {
        Self::with_clock(Arc::new(WallClock::new()))
    }

    /// Driver over the given virtual clock.
    #[must_use]
    pub fn with_virtual_clock(clock: Arc<VirtualClock>) -> Self {
        Self::with_clock(clock)
    }

    /// Driver over any time source.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self::new(TimerDriver::with_clock(clock))
    }

    /// Returns the underlying driver.
    #[must_use]
    pub fn driver(&self) -> &TimerDriver {
        &self.driver
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.driver.now()
    }

    /// See [`TimerDriver::register`].
    pub fn register(&self, deadline: Duration, completer: Completer<(), Infallible>) -> TimerHandle {
        self.driver.register(deadline, completer)
    }

    /// See [`TimerDriver::cancel`].
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.driver.cancel(handle)
    }

    /// See [`TimerDriver::next_deadline`].
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.driver.next_deadline()
    }

    /// See [`TimerDriver::process_timers`].
    pub fn process_timers(&self) -> usize {
        self.driver.process_timers()
    }

    /// See [`TimerDriver::pending_count`].
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.driver.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Deferred;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn lab() -> (Arc<VirtualClock>, TimerDriver) {
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::with_clock(clock.clone());
        (clock, driver)
    }

    #[test]
    fn empty_driver_has_no_deadline() {
        init_test("empty_driver_has_no_deadline");
        let (_, driver) = lab();
        assert!(driver.is_empty());
        assert_eq!(driver.next_deadline(), None);
        assert_eq!(driver.process_timers(), 0);
        crate::test_complete!("empty_driver_has_no_deadline");
    }

    #[test]
    fn next_deadline_is_earliest() {
        init_test("next_deadline_is_earliest");
        let (_, driver) = lab();
        for secs in [5, 3, 7] {
            driver.register(Duration::from_secs(secs), Deferred::new().completer());
        }
        let expected = Some(Duration::from_secs(3));
        let actual = driver.next_deadline();
        crate::assert_with_log!(actual == expected, "earliest deadline", expected, actual);
        assert_eq!(driver.pending_count(), 3);
        crate::test_complete!("next_deadline_is_earliest");
    }

    #[test]
    fn process_completes_expired_only() {
        init_test("process_completes_expired_only");
        let (clock, driver) = lab();
        let early = Deferred::<(), Infallible>::new();
        let late = Deferred::<(), Infallible>::new();
        driver.register(Duration::from_secs(1), early.completer());
        driver.register(Duration::from_secs(2), late.completer());

        assert_eq!(driver.process_timers(), 0);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(driver.process_timers(), 1);
        assert!(early.is_completed());
        assert!(!late.is_settled());

        clock.advance(Duration::from_secs(1));
        assert_eq!(driver.process_timers(), 1);
        assert!(late.is_completed());
        assert!(driver.is_empty());
        crate::test_complete!("process_completes_expired_only");
    }

    #[test]
    fn cancelled_registration_never_fires() {
        init_test("cancelled_registration_never_fires");
        let (clock, driver) = lab();
        let deferred = Deferred::<(), Infallible>::new();
        let handle = driver.register(Duration::from_secs(1), deferred.completer());
        assert!(driver.cancel(handle));
        assert!(!driver.cancel(handle));
        assert_eq!(driver.next_deadline(), None);

        clock.advance(Duration::from_secs(5));
        assert_eq!(driver.process_timers(), 0);
        assert!(!deferred.is_settled());
        crate::test_complete!("cancelled_registration_never_fires");
    }

    #[test]
    fn same_deadline_fires_in_registration_order() {
        init_test("same_deadline_fires_in_registration_order");
        let (clock, driver) = lab();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let deferred = Deferred::<(), Infallible>::new();
            let order = Arc::clone(&order);
            deferred.on_settle(move |_| order.lock().push(tag));
            driver.register(Duration::from_secs(1), deferred.completer());
        }
        clock.advance(Duration::from_secs(1));
        assert_eq!(driver.process_timers(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        crate::test_complete!("same_deadline_fires_in_registration_order");
    }

    #[test]
    fn far_deadline_is_clamped_to_clock_range() {
        init_test("far_deadline_is_clamped_to_clock_range");
        let (clock, driver) = lab();
        let deferred = Deferred::<(), Infallible>::new();
        driver.register(Duration::MAX, deferred.completer());
        assert_eq!(driver.next_deadline(), Some(MAX_DEADLINE));

        clock.advance_to(Duration::MAX);
        assert_eq!(driver.process_timers(), 1);
        assert!(deferred.is_completed());
        crate::test_complete!("far_deadline_is_clamped_to_clock_range");
    }

    #[test]
    fn clear_drops_everything() {
        init_test("clear_drops_everything");
        let handle = TimerDriverHandle::with_virtual_clock(Arc::new(VirtualClock::new()));
        handle.register(Duration::from_secs(1), Deferred::new().completer());
        assert_eq!(handle.pending_count(), 1);
        handle.driver().clear();
        assert_eq!(handle.pending_count(), 0);
        assert_eq!(handle.next_deadline(), None);
        crate::test_complete!("clear_drops_everything");
    }
}
