//! Optional tracing integration.
//!
//! Library code logs through the macros re-exported here. With the
//! `tracing-integration` feature they are the `tracing` macros; without it
//! they expand to nothing, so disabled logging costs nothing at runtime.
//!
//! ```ignore
//! use crate::tracing_compat::{debug, trace};
//!
//! trace!(queued = 3, "gate drain started");
//! ```

#[cfg(feature = "tracing-integration")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

// The no-op macros carry a `log_` prefix: `warn` would clash with the
// builtin `#[warn]` attribute when re-exported by its bare name.
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! log_trace {
        ($($arg:tt)*) => {};
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => {};
    }
    macro_rules! log_info {
        ($($arg:tt)*) => {};
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => {};
    }
    macro_rules! log_error {
        ($($arg:tt)*) => {};
    }

    pub(crate) use log_debug as debug;
    pub(crate) use log_error as error;
    pub(crate) use log_info as info;
    pub(crate) use log_trace as trace;
    pub(crate) use log_warn as warn;
}

#[cfg(not(feature = "tracing-integration"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, info, trace, warn};
