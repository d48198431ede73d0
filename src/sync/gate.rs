//! FIFO-fair binary gate.
//!
//! A [`Gate`] is a ready/not-ready flag guarded by a FIFO queue of waiters.
//! It is binary: there are no permits to count, only the flag.
//!
//! - [`wait_ready`](Gate::wait_ready) resolves once the gate is ready and
//!   every earlier waiter has been released.
//! - [`seize`](Gate::seize) does the same and closes the gate before
//!   returning, giving mutual exclusion between seizing flows.
//! - [`set_ready`](Gate::set_ready) opens or closes the gate. Opening it with
//!   waiters queued starts the drain loop.
//!
//! # Fairness
//!
//! A caller never overtakes queued waiters: if anyone is queued, a new call
//! queues too, even while the gate is ready. The decision is taken when
//! `wait_ready`/`seize` is *called*, not when the returned future is first
//! polled, so call order is release order.
//!
//! # Handoff
//!
//! The drain loop releases one waiter at a time. After waking the queue head
//! it waits on a handoff [`Deferred`] that the woken waiter completes once it
//! has made its post-wake decision (closing the gate, for `seize`). Until
//! then the head stays in the queue, so no fast-path caller can slip in
//! between the wake-up and the close.
//!
//! # Dropping waiters
//!
//! Dropping a queued [`WaitReady`] before it is released removes it from the
//! queue. Dropping one that has been released but not yet polled completes
//! its handoff without closing the gate, so the drain loop moves on to the
//! next waiter. A waiter that is kept alive while the gate never opens again
//! stays queued for as long as it is held.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;

use super::deferred::Deferred;
use crate::tracing_compat::trace;

type Signal = Deferred<(), Infallible>;

struct QueueEntry {
    id: u64,
    release: Signal,
}

struct GateState {
    ready: bool,
    queue: VecDeque<QueueEntry>,
    /// True while a drain loop is running.
    draining: bool,
    /// Completed by the released waiter once it is past its post-wake step.
    handoff: Option<Signal>,
    /// Queue head that has been woken and has not completed the handoff yet.
    released: Option<u64>,
    next_id: u64,
}

struct GateInner {
    state: Mutex<GateState>,
}

/// A binary ready/not-ready gate with a FIFO wait queue.
///
/// Cloning a `Gate` yields another handle to the same gate.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Creates a gate in the given state.
    #[must_use]
    pub fn new(ready: bool) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    ready,
                    queue: VecDeque::new(),
                    draining: false,
                    handoff: None,
                    released: None,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Returns whether the gate is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// Number of queued waiters, including one that is mid-handoff.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns true while the drain loop is releasing waiters.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Opens or closes the gate.
    ///
    /// Opening a gate with queued waiters starts the drain loop unless one is
    /// already running. Closing it stops an active drain loop after the
    /// current handoff. Setting the current state again does nothing.
    pub fn set_ready(&self, ready: bool) {
        let start_drain = {
            let mut state = self.inner.state.lock();
            if state.ready == ready {
                return;
            }
            state.ready = ready;
            trace!(ready, queued = state.queue.len(), "gate state changed");
            ready && !state.draining && !state.queue.is_empty()
        };
        if start_drain {
            GateInner::drain(&self.inner);
        }
    }

    /// Waits until the gate is ready and every earlier waiter has been released.
    pub fn wait_ready(&self) -> WaitReady {
        self.wait_ready_with(false)
    }

    /// Waits like [`wait_ready`](Self::wait_ready), then closes the gate.
    ///
    /// The gate is always not-ready when the returned future resolves.
    pub fn seize(&self) -> WaitReady {
        self.wait_ready_with(true)
    }

    /// Waits for the gate, closing it afterwards when `seize` is true.
    pub fn wait_ready_with(&self, seize: bool) -> WaitReady {
        let mut state = self.inner.state.lock();
        let phase = if !state.ready || !state.queue.is_empty() {
            let id = state.next_id;
            state.next_id += 1;
            let release = Signal::new();
            state.queue.push_back(QueueEntry {
                id,
                release: release.clone(),
            });
            trace!(id, seize, queued = state.queue.len(), "gate waiter queued");
            Phase::Queued { id, release }
        } else {
            if seize {
                state.ready = false;
            }
            Phase::Immediate
        };
        drop(state);

        WaitReady {
            gate: Arc::clone(&self.inner),
            seize,
            phase,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Gate")
            .field("ready", &state.ready)
            .field("queued", &state.queue.len())
            .field("draining", &state.draining)
            .finish()
    }
}

impl GateInner {
    /// Runs drain steps until the gate closes or the queue empties.
    ///
    /// Each step wakes the queue head and returns; the next step runs from the
    /// handoff continuation once the woken waiter has made its decision.
    fn drain(inner: &Arc<Self>) {
        let (release, handoff) = {
            let mut state = inner.state.lock();
            let head = if state.ready {
                state.queue.front().map(|entry| (entry.id, entry.release.clone()))
            } else {
                None
            };
            let Some((id, release)) = head else {
                trace!(
                    ready = state.ready,
                    queued = state.queue.len(),
                    "gate drain stopped"
                );
                state.draining = false;
                state.handoff = None;
                return;
            };
            if !state.draining {
                trace!(queued = state.queue.len(), "gate drain started");
            }
            let handoff = Signal::new();
            state.draining = true;
            state.released = Some(id);
            state.handoff = Some(handoff.clone());
            (release, handoff)
        };

        let gate = Arc::downgrade(inner);
        handoff.on_settle(move |_| Self::after_handoff(&gate));
        release.complete(());
    }

    fn after_handoff(gate: &Weak<Self>) {
        let Some(inner) = gate.upgrade() else {
            return;
        };
        inner.state.lock().queue.pop_front();
        Self::drain(&inner);
    }

    /// Post-wake step of the released waiter `id`.
    fn finish_handoff(&self, id: u64, seize: bool) {
        let handoff = {
            let mut state = self.state.lock();
            if state.released != Some(id) {
                return;
            }
            state.released = None;
            if seize {
                state.ready = false;
            }
            trace!(id, seize, "gate handoff");
            state.handoff.clone()
        };
        if let Some(handoff) = handoff {
            handoff.complete(());
        }
    }

    /// Drops waiter `id`: withdraw it if still queued, or pass the handoff on
    /// if it had already been released.
    fn abandon(&self, id: u64) {
        let released = {
            let mut state = self.state.lock();
            if state.released == Some(id) {
                true
            } else {
                state.queue.retain(|entry| entry.id != id);
                trace!(id, queued = state.queue.len(), "gate waiter withdrawn");
                false
            }
        };
        if released {
            self.finish_handoff(id, false);
        }
    }
}

enum Phase {
    /// Fast path taken at call time.
    Immediate,
    Queued { id: u64, release: Signal },
    Done,
}

/// Future returned by [`Gate::wait_ready`] and [`Gate::seize`].
#[must_use = "futures do nothing unless polled"]
pub struct WaitReady {
    gate: Arc<GateInner>,
    seize: bool,
    phase: Phase,
}

impl WaitReady {
    /// Returns true if the call was queued behind the gate rather than
    /// taking the fast path.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self.phase, Phase::Queued { .. })
    }
}

impl Future for WaitReady {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.phase {
            Phase::Immediate | Phase::Done => {
                this.phase = Phase::Done;
                Poll::Ready(())
            }
            Phase::Queued { id, release } => {
                if Pin::new(release).poll(cx).is_pending() {
                    return Poll::Pending;
                }
                let id = *id;
                this.phase = Phase::Done;
                this.gate.finish_handoff(id, this.seize);
                Poll::Ready(())
            }
        }
    }
}

impl Drop for WaitReady {
    fn drop(&mut self) {
        if let Phase::Queued { id, .. } = self.phase {
            self.gate.abandon(id);
        }
    }
}

impl fmt::Debug for WaitReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            Phase::Immediate => "immediate",
            Phase::Queued { .. } => "queued",
            Phase::Done => "done",
        };
        f.debug_struct("WaitReady")
            .field("seize", &self.seize)
            .field("phase", &phase)
            .finish()
    }
}
