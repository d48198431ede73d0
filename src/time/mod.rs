//! Time: constants, clocks, the timer driver and one-shot timers.
//!
//! - [`TimeSource`]: where "now" comes from ([`WallClock`], [`VirtualClock`])
//! - [`TimerDriver`]: deadline heap that completes [`Deferred`](crate::Deferred)
//!   values when their deadline passes
//! - [`Timer`] and [`Delay`]: the delay capability used by
//!   [`with_retries`](crate::retry::with_retries) and by tests

mod clock;
mod driver;
mod timer;

use std::time::Duration;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use driver::{MAX_DEADLINE, TimerDriver, TimerDriverHandle, TimerHandle};
pub use timer::{Delay, MappedTimer, Timer, timer};

/// Milliseconds in a second.
pub const SEC_MS: u64 = 1_000;
/// Milliseconds in a minute.
pub const MIN_MS: u64 = 60 * SEC_MS;
/// Milliseconds in an hour.
pub const HOUR_MS: u64 = 60 * MIN_MS;
/// Milliseconds in a day.
pub const DAY_MS: u64 = 24 * HOUR_MS;
/// Milliseconds in a 365-day year.
pub const YEAR_MS: u64 = 365 * DAY_MS;

/// One second.
pub const SECOND: Duration = Duration::from_millis(SEC_MS);
/// One minute.
pub const MINUTE: Duration = Duration::from_millis(MIN_MS);
/// One hour.
pub const HOUR: Duration = Duration::from_millis(HOUR_MS);
/// One day.
pub const DAY: Duration = Duration::from_millis(DAY_MS);
/// A 365-day year.
pub const YEAR: Duration = Duration::from_millis(YEAR_MS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_line_up() {
        assert_eq!(MIN_MS, 60_000);
        assert_eq!(DAY_MS, 86_400_000);
        assert_eq!(YEAR_MS, 31_536_000_000);
        assert_eq!(HOUR, Duration::from_secs(3_600));
        assert_eq!(YEAR, DAY * 365);
    }
}
