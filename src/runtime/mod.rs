//! Cooperative local runtime.
//!
//! [`LocalRuntime`] drives flows built from [`Gate`](crate::Gate) and
//! [`Deferred`](crate::Deferred) on a single thread, pumping the timer
//! driver whenever it runs out of ready work. A lab runtime uses a virtual
//! clock so timed scenarios run instantly and deterministically.

mod local;
mod waker;
mod yield_now;

pub use local::LocalRuntime;
pub use yield_now::{YieldNow, yield_now, yield_times};
