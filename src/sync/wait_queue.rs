// src/sync/wait_queue.rs

//! Blocking wait queues
//!
//! A [`WaitQueue`] is a FIFO of [`Waiter`]s built on a lock-free
//! `crossbeam_queue::SegQueue`. A waiter is enqueued while the caller still
//! holds the lock protecting the condition it waits for, and wakers run
//! under that same lock, so a wakeup can never slip in between the check
//! and the enqueue.
//!
//! Waiters that gave up (cancelled, timed out, or a poll that found another
//! descriptor ready) stay in the queue and are skipped when popped. A wakeup
//! is therefore only spent on a task that is really asleep. Once the queue
//! has doubled since it was last swept, the next push drops those entries,
//! so a queue that is never woken stays bounded by its live waiters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_queue::SegQueue;

use crate::kernel::core::{ErrorKind, KernelError, KernelResult};
use crate::kernel::task::{self, Task};

const WAITING: u8 = 0;
const NOTIFIED: u8 = 1;
const ABANDONED: u8 = 2;

/// Queue length below which pushes never sweep
const SWEEP_THRESHOLD: usize = 16;

/// Why a wait finished without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A waker selected this waiter
    Notified,
    /// The deadline passed first
    TimedOut,
}

/// One blocked task, possibly enqueued on several wait queues
#[derive(Debug)]
pub struct Waiter {
    task: Task,
    state: AtomicU8,
}

impl Waiter {
    /// Creates a waiter for the calling task
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            task: task::current(),
            state: AtomicU8::new(WAITING),
        })
    }

    /// Wakes the waiter. Returns `false` if it was already woken or gave up.
    pub fn notify(&self) -> bool {
        if self
            .state
            .compare_exchange(WAITING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.task.unpark();
            true
        } else {
            false
        }
    }

    /// The waiter has been selected by a waker
    pub fn is_notified(&self) -> bool {
        self.state.load(Ordering::Acquire) == NOTIFIED
    }

    /// Still asleep, neither woken nor withdrawn
    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAITING
    }

    /// Withdraws the waiter without blocking.
    ///
    /// Returns `false` if a waker got to it first.
    pub fn abandon(&self) -> bool {
        self.state
            .compare_exchange(WAITING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Blocks until notified or cancelled
    pub fn wait(&self) -> KernelResult<()> {
        self.wait_until(None).map(|_| ())
    }

    /// Blocks until notified, cancelled, or `deadline` passes.
    ///
    /// A cancellation that loses the race against a notification stays
    /// pending for the next suspension point.
    pub fn wait_until(&self, deadline: Option<Instant>) -> KernelResult<WaitOutcome> {
        debug_assert!(self.task.is_current(), "waiter used by a foreign task");

        #[cfg(feature = "wait_trace")]
        log::trace!("{}: blocking", self.task.id());

        loop {
            if self.is_notified() {
                return Ok(WaitOutcome::Notified);
            }

            if self.task.is_cancel_pending() {
                if self.abandon() {
                    self.task.take_cancel();
                    return Err(KernelError::with_context(
                        ErrorKind::Interrupted,
                        "blocked call cancelled",
                    ));
                }
                return Ok(WaitOutcome::Notified);
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        if self.abandon() {
                            return Ok(WaitOutcome::TimedOut);
                        }
                        return Ok(WaitOutcome::Notified);
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        }
    }
}

/// FIFO queue of blocked tasks
#[derive(Debug)]
pub struct WaitQueue {
    name: &'static str,
    waiters: SegQueue<Arc<Waiter>>,
    sweep_at: AtomicUsize,
}

impl WaitQueue {
    /// Creates an empty queue; `name` only shows up in traces
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            waiters: SegQueue::new(),
            sweep_at: AtomicUsize::new(SWEEP_THRESHOLD),
        }
    }

    /// Enqueues a waiter
    pub fn push(&self, waiter: Arc<Waiter>) {
        if self.waiters.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep();
        }
        self.waiters.push(waiter);
    }

    /// Drops entries that can no longer be woken, keeping the rest in order.
    ///
    /// Callers hold the lock that serializes pushes and wakeups.
    fn sweep(&self) {
        let entries = self.waiters.len();
        let mut live = 0;
        for _ in 0..entries {
            match self.waiters.pop() {
                Some(waiter) if waiter.is_waiting() => {
                    self.waiters.push(waiter);
                    live += 1;
                }
                Some(_) => {}
                None => break,
            }
        }
        self.sweep_at.store((live * 2).max(SWEEP_THRESHOLD), Ordering::Relaxed);

        #[cfg(feature = "wait_trace")]
        log::trace!("{}: swept {} stale entries", self.name, entries - live);
    }

    /// Wakes the longest-waiting live waiter. Returns whether one was woken.
    pub fn wake_one(&self) -> bool {
        while let Some(waiter) = self.waiters.pop() {
            if waiter.notify() {
                #[cfg(feature = "wait_trace")]
                log::trace!("{}: woke {}", self.name, waiter.task.id());
                return true;
            }
        }
        false
    }

    /// Wakes every live waiter, returning how many were woken
    pub fn wake_all(&self) -> usize {
        let mut woken = 0;
        while let Some(waiter) = self.waiters.pop() {
            if waiter.notify() {
                woken += 1;
            }
        }

        #[cfg(feature = "wait_trace")]
        if woken > 0 {
            log::trace!("{}: woke {} waiters", self.name, woken);
        }
        woken
    }

    /// Number of enqueued entries, including ones that already gave up
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// No entries are enqueued
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Queue name
    pub fn name(&self) -> &'static str {
        self.name
    }
}
