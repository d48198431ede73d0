//! Test helpers: logging setup and assertion macros.
//!
//! Available to unit tests and, with the `test-internals` feature, to
//! integration tests. Logs go through `tracing-subscriber`'s test writer so
//! they are captured per test; set `RUST_LOG` to widen the default filter.

use std::sync::Once;

#[doc(hidden)]
pub use tracing;

static INIT: Once = Once::new();

/// Default filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "coopsync=trace";

/// Installs the global test subscriber once per process.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Marks the start of a named test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(phase = %$name, "test phase start")
    };
}

/// Marks the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(test = %$name, "test complete")
    };
}

/// Asserts a condition, logging the expected and actual values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::test_utils::tracing::error!(
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed: {}",
                $msg
            );
        }
        assert!(
            ok,
            "{}: expected {:?}, actual {:?}",
            $msg,
            $expected,
            $actual
        );
    }};
}
