//! Single-threaded cooperative executor.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::Duration;

use slab::Slab;

use super::waker::{MainWaker, ReadyQueue, TaskWaker};
use crate::config::{ClockKind, RuntimeConfig};
use crate::error::{Error, Result};
use crate::sync::Deferred;
use crate::time::{TimerDriverHandle, VirtualClock};
use crate::tracing_compat::{debug, trace, warn};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

struct TaskSlot {
    /// `None` while the task is being polled.
    future: Option<LocalFuture>,
    waker: Arc<TaskWaker>,
}

struct Inner {
    tasks: RefCell<Slab<TaskSlot>>,
    queue: Arc<ReadyQueue>,
    timers: TimerDriverHandle,
    virtual_clock: Option<Arc<VirtualClock>>,
    poll_budget: Option<usize>,
    polls: Cell<usize>,
    /// Polls charged against the budget by the current entry point.
    charged: Cell<usize>,
}

/// Single-threaded cooperative runtime.
///
/// Spawned tasks are polled in the order they were woken. When nothing is
/// runnable the runtime fires expired timers and, if still idle, moves time
/// forward: a lab runtime jumps its virtual clock to the next deadline, a
/// wall runtime parks the thread until then.
///
/// ```
/// use coopsync::runtime::LocalRuntime;
/// use coopsync::time::{Delay, SECOND};
///
/// let rt = LocalRuntime::lab();
/// let timers = rt.timers();
/// let elapsed = rt
///     .block_on(async move {
///         timers.delay(SECOND).await;
///         timers.now()
///     })
///     .unwrap();
/// assert_eq!(elapsed, SECOND);
/// ```
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct LocalRuntime {
    inner: Rc<Inner>,
}

impl LocalRuntime {
    /// Creates a runtime from `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let (timers, virtual_clock) = match config.clock {
            ClockKind::Wall => (TimerDriverHandle::wall(), None),
            ClockKind::Virtual => {
                let clock = Arc::new(VirtualClock::new());
                (
                    TimerDriverHandle::with_virtual_clock(Arc::clone(&clock)),
                    Some(clock),
                )
            }
        };
        debug!(clock = ?config.clock, poll_budget = ?config.poll_budget, "local runtime created");
        Self {
            inner: Rc::new(Inner {
                tasks: RefCell::new(Slab::new()),
                queue: Arc::new(ReadyQueue::new()),
                timers,
                virtual_clock,
                poll_budget: config.poll_budget,
                polls: Cell::new(0),
                charged: Cell::new(0),
            }),
        }
    }

    /// Wall-clock runtime.
    #[must_use]
    pub fn wall() -> Self {
        Self::new(RuntimeConfig::wall())
    }

    /// Virtual-clock runtime for deterministic tests.
    #[must_use]
    pub fn lab() -> Self {
        Self::new(RuntimeConfig::lab())
    }

    /// Returns the timer driver; it implements [`Delay`](crate::time::Delay).
    #[must_use]
    pub fn timers(&self) -> TimerDriverHandle {
        self.inner.timers.clone()
    }

    /// Returns the virtual clock of a lab runtime.
    #[must_use]
    pub fn virtual_clock(&self) -> Option<&Arc<VirtualClock>> {
        self.inner.virtual_clock.as_ref()
    }

    /// Current time on the runtime's clock.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.timers.now()
    }

    /// Number of spawned tasks that have not finished.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Total polls performed so far, `block_on` futures included.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.inner.polls.get()
    }

    /// Spawns a task. The returned deferred value completes with its output.
    ///
    /// The task is queued behind everything already runnable.
    pub fn spawn<F>(&self, future: F) -> Deferred<F::Output, Infallible>
    where
        F: Future + 'static,
        F::Output: Clone,
    {
        let output = Deferred::new();
        let completer = output.completer();
        let mut tasks = self.inner.tasks.borrow_mut();
        let entry = tasks.vacant_entry();
        let id = entry.key();
        let waker = Arc::new(TaskWaker::new(id, Arc::clone(&self.inner.queue)));
        entry.insert(TaskSlot {
            future: Some(Box::pin(async move {
                completer.complete(future.await);
            })),
            waker: Arc::clone(&waker),
        });
        drop(tasks);
        trace!(task = id, "task spawned");
        waker.schedule();
        output
    }

    fn charge_poll(&self) -> Result<()> {
        let charged = self.inner.charged.get();
        if let Some(budget) = self.inner.poll_budget {
            if charged >= budget {
                warn!(budget, "poll budget exhausted");
                return Err(Error::PollBudgetExhausted(budget));
            }
        }
        self.inner.charged.set(charged + 1);
        self.inner.polls.set(self.inner.polls.get() + 1);
        Ok(())
    }

    /// Polls ready tasks until none is runnable. Returns how many polls ran.
    ///
    /// Timers are not processed; see [`block_on`](Self::block_on). The poll
    /// budget starts afresh with each call.
    pub fn run_until_stalled(&self) -> Result<usize> {
        self.inner.charged.set(0);
        self.drain_ready()
    }

    fn drain_ready(&self) -> Result<usize> {
        let mut polls = 0;
        while let Some(id) = self.inner.queue.pop() {
            let taken = self.inner.tasks.borrow_mut().get_mut(id).and_then(|slot| {
                slot.waker.reset();
                slot.future
                    .take()
                    .map(|future| (future, Arc::clone(&slot.waker)))
            });
            // Stale wake for a finished task, or a re-entrant wake.
            let Some((mut future, waker)) = taken else {
                continue;
            };
            if let Err(err) = self.charge_poll() {
                self.put_back(id, future);
                waker.schedule();
                return Err(err);
            }
            polls += 1;
            let waker = Waker::from(waker);
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    self.inner.tasks.borrow_mut().try_remove(id);
                    trace!(task = id, "task finished");
                }
                Poll::Pending => self.put_back(id, future),
            }
        }
        Ok(polls)
    }

    fn put_back(&self, id: usize, future: LocalFuture) {
        if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(id) {
            slot.future = Some(future);
        }
    }

    /// Runs `future` to completion, driving spawned tasks and timers.
    ///
    /// Fails with [`Error::Stalled`] when a lab runtime has nothing left to
    /// run and no pending timer, and with [`Error::PollBudgetExhausted`] when
    /// the configured budget runs out. The budget covers this call only.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        self.inner.charged.set(0);
        let mut future = pin!(future);
        let queue = &self.inner.queue;
        let waker = Waker::from(Arc::new(MainWaker::new(Arc::clone(queue))));
        let mut cx = Context::from_waker(&waker);
        queue.wake_main();

        loop {
            if queue.take_main_wake() {
                self.charge_poll()?;
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
            }
            self.drain_ready()?;
            if queue.main_woken() || queue.has_ready() {
                continue;
            }
            if self.inner.timers.process_timers() > 0 {
                continue;
            }
            self.idle()?;
        }
    }

    /// Nothing is runnable and no timer has expired: move time forward.
    fn idle(&self) -> Result<()> {
        let next = self.inner.timers.next_deadline();
        match (&self.inner.virtual_clock, next) {
            (Some(clock), Some(deadline)) => {
                trace!(deadline_ms = deadline.as_millis() as u64, "advancing virtual clock");
                clock.advance_to(deadline);
            }
            (Some(_), None) => {
                debug!(tasks = self.task_count(), "lab runtime stalled");
                return Err(Error::Stalled);
            }
            (None, Some(deadline)) => {
                let now = self.now();
                if deadline > now {
                    thread::park_timeout(deadline - now);
                }
            }
            (None, None) => thread::park(),
        }
        Ok(())
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::wall()
    }
}

impl fmt::Debug for LocalRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRuntime")
            .field("tasks", &self.task_count())
            .field("polls", &self.poll_count())
            .field("virtual", &self.inner.virtual_clock.is_some())
            .field("timers", &self.inner.timers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::yield_now;
    use crate::time::Delay;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn block_on_ready_future() {
        init_test("block_on_ready_future");
        let rt = LocalRuntime::lab();
        let value = rt.block_on(async { 42 }).unwrap();
        assert_eq!(value, 42);
        assert_eq!(rt.poll_count(), 1);
        crate::test_complete!("block_on_ready_future");
    }

    #[test]
    fn spawned_tasks_run_fifo() {
        init_test("spawned_tasks_run_fifo");
        let rt = LocalRuntime::lab();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..3 {
            let order = Rc::clone(&order);
            rt.spawn(async move {
                order.borrow_mut().push(tag);
                yield_now().await;
                order.borrow_mut().push(tag + 10);
            });
        }
        let polls = rt.run_until_stalled().unwrap();
        assert_eq!(polls, 6);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 10, 11, 12]);
        assert_eq!(rt.task_count(), 0);
        crate::test_complete!("spawned_tasks_run_fifo");
    }

    #[test]
    fn spawn_output_is_deferred() {
        init_test("spawn_output_is_deferred");
        let rt = LocalRuntime::lab();
        let output = rt.spawn(async { "done" });
        assert!(!output.is_settled());
        let value = rt.block_on(output).unwrap();
        assert_eq!(value, Ok("done"));
        crate::test_complete!("spawn_output_is_deferred");
    }

    #[test]
    fn lab_clock_jumps_to_deadlines() {
        init_test("lab_clock_jumps_to_deadlines");
        let rt = LocalRuntime::lab();
        let timers = rt.timers();
        let now = rt
            .block_on(async move {
                timers.delay(Duration::from_millis(250)).await;
                timers.delay(Duration::from_millis(750)).await;
                timers.now()
            })
            .unwrap();
        crate::assert_with_log!(
            now == Duration::from_secs(1),
            "virtual time after sleeps",
            Duration::from_secs(1),
            now
        );
        crate::test_complete!("lab_clock_jumps_to_deadlines");
    }

    #[test]
    fn lab_runtime_reports_stall() {
        init_test("lab_runtime_reports_stall");
        let rt = LocalRuntime::lab();
        let never = Deferred::<(), Infallible>::new();
        let err = rt.block_on(never.clone()).unwrap_err();
        assert_eq!(err, Error::Stalled);
        crate::test_complete!("lab_runtime_reports_stall");
    }

    #[test]
    fn poll_budget_is_enforced() {
        init_test("poll_budget_is_enforced");
        let rt = LocalRuntime::new(RuntimeConfig::lab().poll_budget(5));
        let err = rt
            .block_on(async {
                loop {
                    yield_now().await;
                }
            })
            .unwrap_err();
        assert_eq!(err, Error::PollBudgetExhausted(5));
        assert_eq!(rt.poll_count(), 5);
        crate::test_complete!("poll_budget_is_enforced");
    }

    #[test]
    fn poll_budget_applies_per_block_on() {
        init_test("poll_budget_applies_per_block_on");
        let rt = LocalRuntime::new(RuntimeConfig::lab().poll_budget(5));
        for round in 0..10 {
            let value = rt.block_on(async { 1 });
            crate::assert_with_log!(
                value == Ok(1),
                "block_on within budget",
                (round, Ok::<i32, Error>(1)),
                (round, &value)
            );
        }
        assert_eq!(rt.poll_count(), 10);

        for _ in 0..3 {
            rt.spawn(async {
                yield_now().await;
            });
        }
        assert_eq!(rt.run_until_stalled(), Ok(6));
        assert_eq!(rt.poll_count(), 16);
        crate::test_complete!("poll_budget_applies_per_block_on");
    }

    #[test]
    fn delay_beyond_clock_range_fires_at_its_limit() {
        init_test("delay_beyond_clock_range_fires_at_its_limit");
        let rt = LocalRuntime::new(RuntimeConfig::lab().poll_budget(1000));
        let timers = rt.timers();
        let now = rt
            .block_on(async move {
                timers.delay(crate::time::YEAR * 600).await;
                timers.now()
            })
            .unwrap();
        assert_eq!(now, Duration::from_nanos(u64::MAX));
        crate::test_complete!("delay_beyond_clock_range_fires_at_its_limit");
    }

    #[test]
    fn tasks_spawned_from_tasks_run() {
        init_test("tasks_spawned_from_tasks_run");
        let rt = LocalRuntime::lab();
        let inner_rt = rt.clone();
        let outer = rt.spawn(async move {
            let inner = inner_rt.spawn(async { 7 });
            inner.await.map(|v| v * 6)
        });
        assert_eq!(rt.block_on(outer).unwrap(), Ok(Ok(42)));
        crate::test_complete!("tasks_spawned_from_tasks_run");
    }

    #[test]
    fn wall_runtime_sleeps() {
        init_test("wall_runtime_sleeps");
        let rt = LocalRuntime::wall();
        let timers = rt.timers();
        let start = rt.now();
        rt.block_on(async move { timers.delay(Duration::from_millis(20)).await })
            .unwrap();
        assert!(rt.now() - start >= Duration::from_millis(20));
        crate::test_complete!("wall_runtime_sleeps");
    }

    #[test]
    fn wall_runtime_wakes_from_other_thread() {
        init_test("wall_runtime_wakes_from_other_thread");
        let rt = LocalRuntime::wall();
        let signal = Deferred::<u32, Infallible>::new();
        let completer = signal.completer();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(9);
        });
        assert_eq!(rt.block_on(signal).unwrap(), Ok(9));
        handle.join().expect("completer thread panicked");
        crate::test_complete!("wall_runtime_wakes_from_other_thread");
    }
}
