//! Time sources.
//!
//! Times are expressed as a [`Duration`] since the clock's own epoch. The
//! timer driver only compares instants taken from the same source, so the
//! epoch never needs to be shared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[inline]
pub(crate) fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Time source abstraction for getting the current time.
///
/// Lets the timer driver run against the wall clock in production and a
/// virtual clock in tests.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Returns the time elapsed since this source's epoch.
    fn now(&self) -> Duration;
}

/// Monotonic wall clock whose epoch is its creation time.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a new wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A clock that only moves when told to.
///
/// ```
/// use coopsync::time::{TimeSource, VirtualClock};
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Duration::ZERO);
///
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(clock.now(), Duration::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    /// Current time in nanoseconds.
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at `time`.
    #[must_use]
    pub fn starting_at(time: Duration) -> Self {
        Self {
            now: AtomicU64::new(duration_to_nanos_saturating(time)),
        }
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let nanos = duration_to_nanos_saturating(delta);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Advances the clock to `time`. Moving backwards is a no-op.
    pub fn advance_to(&self, time: Duration) {
        self.now
            .fetch_max(duration_to_nanos_saturating(time), Ordering::AcqRel);
    }

    /// Sets the clock to `time`, backwards included.
    pub fn set(&self, time: Duration) {
        self.now
            .store(duration_to_nanos_saturating(time), Ordering::Release);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now.load(Ordering::Acquire))
    }
}
