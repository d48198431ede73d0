//! Cooperative yielding.
//!
//! Awaiting [`yield_now`] puts the current task at the back of the ready
//! queue, so a task holding a seized [`Gate`](crate::Gate) can let queued
//! callers observe that it still holds it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`] and [`yield_times`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    remaining: u32,
}

impl YieldNow {
    /// Yields still owed before the future resolves.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.remaining.checked_sub(1) {
            None => Poll::Ready(()),
            Some(left) => {
                self.remaining = left;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

/// Lets every other runnable task go once before resuming.
pub fn yield_now() -> YieldNow {
    yield_times(1)
}

/// Goes to the back of the ready queue `times` times in a row.
pub fn yield_times(times: u32) -> YieldNow {
    YieldNow { remaining: times }
}
