//! Timers, retries and events working together under the lab runtime.

use coopsync::time::{Delay, SECOND, Timer};
use coopsync::{
    Emitter, Error, Gate, LocalRuntime, RetryPolicy, assert_with_log, test_complete, test_phase,
    with_retries,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn init_test(name: &str) {
    coopsync::test_utils::init_test_logging();
    test_phase!(name);
}

#[test]
fn retry_waits_for_a_gate_opened_by_a_timer() {
    init_test("retry_waits_for_a_gate_opened_by_a_timer");
    let rt = LocalRuntime::lab();
    let timers = rt.timers();
    let gate = Gate::new(false);

    // Opens the gate after 1s.
    let opener = gate.clone();
    let opener_timers = timers.clone();
    rt.spawn(async move {
        opener_timers.delay(SECOND).await;
        opener.set_ready(true);
    });

    let attempts = Rc::new(Cell::new(0u32));
    let policy = RetryPolicy::new(10, Duration::from_millis(300));
    let probe = gate.clone();
    let counter = Rc::clone(&attempts);
    let retry_timers = timers.clone();
    let result = rt
        .block_on(async move {
            with_retries(&retry_timers, policy, || {
                counter.set(counter.get() + 1);
                let open = probe.is_ready();
                async move { if open { Ok("open") } else { Err("closed") } }
            })
            .await
        })
        .unwrap();

    assert_eq!(result, Ok("open"));
    // Attempts at 0, 300, 600, 900 fail; 1200 succeeds.
    let n = attempts.get();
    assert_with_log!(n == 5, "attempt count", 5, n);
    assert_eq!(rt.now(), Duration::from_millis(1200));
    test_complete!("retry_waits_for_a_gate_opened_by_a_timer");
}

#[test]
fn aborted_timer_does_not_fire_and_runtime_stalls() {
    init_test("aborted_timer_does_not_fire_and_runtime_stalls");
    let rt = LocalRuntime::lab();
    let timers = rt.timers();
    let timer = Timer::new(&timers);
    timer.init(SECOND).unwrap();
    timer.abort();
    assert_eq!(timers.pending_count(), 0);

    let err = rt.block_on(timer.clone()).unwrap_err();
    assert_eq!(err, Error::Stalled);
    assert!(!timer.is_settled());
    assert_eq!(rt.now(), Duration::ZERO);
    test_complete!("aborted_timer_does_not_fire_and_runtime_stalls");
}

#[test]
fn ticks_broadcast_to_listeners() {
    init_test("ticks_broadcast_to_listeners");
    let rt = LocalRuntime::lab();
    let timers = rt.timers();
    let ticks: Arc<Emitter<Duration>> = Arc::new(Emitter::new());
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    let sub = ticks.add_listener(Arc::new(move |_: &Duration| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let source = Arc::clone(&ticks);
    let tick_timers = timers.clone();
    rt.block_on(async move {
        for _ in 0..3 {
            tick_timers.delay(SECOND).await;
            source.emit(&tick_timers.now());
        }
    })
    .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    sub.unsubscribe();
    ticks.emit(&rt.now());
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(rt.now(), SECOND * 3);
    test_complete!("ticks_broadcast_to_listeners");
}
