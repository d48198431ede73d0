//! Synchronization primitives for cooperative flows.
//!
//! - [`Deferred`]: a single-assignment future completed from outside, with
//!   transforms that keep the root's completion controller.
//! - [`Gate`]: a binary ready/not-ready gate with a FIFO wait queue and
//!   handoff-based release, usable as a mutual-exclusion primitive via
//!   [`Gate::seize`].

pub mod deferred;
pub mod gate;

pub use deferred::{Completer, Deferred, DeferredState};
pub use gate::{Gate, WaitReady};
