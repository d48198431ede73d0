//! Coopsync: cooperative synchronization primitives for single-threaded async flows.
//!
//! # Overview
//!
//! Two primitives sit at the core:
//!
//! - [`Deferred`]: a single-assignment future that anyone holding it can
//!   settle. Values derived from it with [`map`](Deferred::map),
//!   [`and_then`](Deferred::and_then) and friends share the root's
//!   completion controller, so settling any link of a chain settles the root.
//! - [`Gate`]: a binary ready/not-ready gate. Waiters queue in FIFO order and
//!   are released one at a time; a waiter that [seizes](Gate::seize) the gate
//!   flips it back to not-ready before the next one is considered, which
//!   makes the gate a fair async mutex.
//!
//! Around them:
//!
//! - [`time`]: clocks, a timer driver and one-shot [`Timer`]s
//! - [`runtime`]: [`LocalRuntime`], a single-threaded executor with a lab
//!   mode running on virtual time
//! - [`retry`]: [`with_retries`](retry::with_retries)
//! - [`emitter`]: a listener registry
//! - [`cached`]: a time-bounded memoizing cache
//! - [`config`]: typed configuration, optionally loaded from TOML
//! - [`error`](mod@error): error types
//! - `tracing_compat`: optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use coopsync::{Gate, LocalRuntime};
//!
//! let rt = LocalRuntime::lab();
//! let gate = Gate::new(true);
//! let lock = gate.clone();
//! rt.block_on(async move {
//!     lock.seize().await;
//!     assert!(!lock.is_ready());
//!     lock.set_ready(true);
//! })
//! .unwrap();
//! assert!(gate.is_ready());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod cached;
pub mod config;
pub mod emitter;
pub mod error;
pub mod retry;
pub mod runtime;
pub mod sync;
pub mod time;
mod tracing_compat;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use cached::Cached;
pub use config::{Config, RetryPolicy, RuntimeConfig};
pub use emitter::Emitter;
pub use error::{Error, Failure, Result};
pub use retry::with_retries;
pub use runtime::LocalRuntime;
pub use sync::{Completer, Deferred, DeferredState, Gate, WaitReady};
pub use time::{Delay, Timer, timer};
