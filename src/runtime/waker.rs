//! Wakers for the local runtime.
//!
//! Wakers are `Send + Sync` even though the runtime itself is not: a deferred
//! value may be completed from another thread, and that thread has to be able
//! to reschedule the waiting task. Waking pushes the task id onto a shared
//! ready queue and unparks the runtime thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Wake;
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// Ready queue shared between the runtime and its wakers.
#[derive(Debug)]
pub(crate) struct ReadyQueue {
    tasks: Mutex<VecDeque<usize>>,
    main_woken: AtomicBool,
    thread: Thread,
}

impl ReadyQueue {
    /// Creates a queue owned by the current thread.
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            main_woken: AtomicBool::new(false),
            thread: thread::current(),
        }
    }

    pub(crate) fn push(&self, id: usize) {
        self.tasks.lock().push_back(id);
        self.thread.unpark();
    }

    pub(crate) fn pop(&self) -> Option<usize> {
        self.tasks.lock().pop_front()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    pub(crate) fn wake_main(&self) {
        self.main_woken.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Consumes a pending main wake-up.
    pub(crate) fn take_main_wake(&self) -> bool {
        self.main_woken.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn main_woken(&self) -> bool {
        self.main_woken.load(Ordering::Acquire)
    }
}

/// Waker for a spawned task.
///
/// `scheduled` suppresses duplicate queue entries until the task is polled.
#[derive(Debug)]
pub(crate) struct TaskWaker {
    id: usize,
    scheduled: AtomicBool,
    queue: Arc<ReadyQueue>,
}

impl TaskWaker {
    pub(crate) fn new(id: usize, queue: Arc<ReadyQueue>) -> Self {
        Self {
            id,
            scheduled: AtomicBool::new(false),
            queue,
        }
    }

    /// Clears the scheduled flag; called right before the task is polled.
    pub(crate) fn reset(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub(crate) fn schedule(&self) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.queue.push(self.id);
        }
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Waker for the future passed to `block_on`.
#[derive(Debug)]
pub(crate) struct MainWaker {
    queue: Arc<ReadyQueue>,
}

impl MainWaker {
    pub(crate) fn new(queue: Arc<ReadyQueue>) -> Self {
        Self { queue }
    }
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.queue.wake_main();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.wake_main();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn duplicate_wakes_queue_once() {
        let queue = Arc::new(ReadyQueue::new());
        let waker = Arc::new(TaskWaker::new(7, Arc::clone(&queue)));
        let as_waker = Waker::from(Arc::clone(&waker));
        as_waker.wake_by_ref();
        as_waker.wake_by_ref();
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), None);

        waker.reset();
        as_waker.wake();
        assert_eq!(queue.pop(), Some(7));
    }

    #[test]
    fn main_wake_is_consumed_once() {
        let queue = Arc::new(ReadyQueue::new());
        let waker = Waker::from(Arc::new(MainWaker::new(Arc::clone(&queue))));
        assert!(!queue.main_woken());
        waker.wake_by_ref();
        assert!(queue.main_woken());
        assert!(queue.take_main_wake());
        assert!(!queue.take_main_wake());
        assert!(!queue.has_ready());
    }

    #[test]
    fn wake_from_another_thread() {
        let queue = Arc::new(ReadyQueue::new());
        let waker = Waker::from(Arc::new(TaskWaker::new(3, Arc::clone(&queue))));
        std::thread::spawn(move || waker.wake())
            .join()
            .expect("waker thread panicked");
        assert_eq!(queue.pop(), Some(3));
    }
}
