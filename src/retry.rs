//! Retrying fallible async actions.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::time::Delay;
use crate::tracing_compat::{debug, warn};

/// Runs `action` until it succeeds, at most `policy.max_retries` times.
///
/// Between failed attempts it awaits `delay.delay(policy.interval)`. Returns
/// the first success, or the error of the last attempt. A policy with
/// `max_retries == 0` still makes one attempt.
///
/// ```
/// use coopsync::config::RetryPolicy;
/// use coopsync::retry::with_retries;
/// use coopsync::runtime::LocalRuntime;
/// use std::cell::Cell;
///
/// let rt = LocalRuntime::lab();
/// let timers = rt.timers();
/// let calls = Cell::new(0);
/// let result = rt
///     .block_on(with_retries(&timers, RetryPolicy::default(), || {
///         calls.set(calls.get() + 1);
///         let attempt = calls.get();
///         async move { if attempt < 3 { Err("flaky") } else { Ok(attempt) } }
///     }))
///     .unwrap();
/// assert_eq!(result, Ok(3));
/// ```
pub async fn with_retries<D, F, Fut, T, E>(
    delay: &D,
    policy: RetryPolicy,
    mut action: F,
) -> Result<T, E>
where
    D: Delay + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 1;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(_) if attempt < policy.max_retries => {
                debug!(
                    attempt,
                    max_retries = policy.max_retries,
                    interval_ms = policy.interval.as_millis() as u64,
                    "attempt failed, retrying"
                );
                delay.delay(policy.interval).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(attempt, "giving up after final attempt");
                return Err(err);
            }
        }
    }
}
