//! poll(2) over several handles

use std::time::{Duration, Instant};

use crate::kernel::core::{KernelResult, PollEvents};
use crate::kernel::fs::File;
use crate::sync::{WaitOutcome, Waiter};

/// One entry of a poll set
#[derive(Debug)]
pub struct PollFd<'a> {
    /// Handle to watch
    pub file: &'a File,
    /// Events of interest
    pub events: PollEvents,
    /// Events that occurred, filled in by [`poll`]
    pub revents: PollEvents,
}

impl<'a> PollFd<'a> {
    /// Watches `file` for `events`
    pub fn new(file: &'a File, events: PollEvents) -> Self {
        Self {
            file,
            events,
            revents: PollEvents::empty(),
        }
    }
}

/// Waits until at least one handle in `fds` is ready.
///
/// Returns the number of entries with a nonempty `revents`, or 0 when
/// `timeout` elapsed first. `ERR`, `HUP` and `NVAL` are reported even when
/// not asked for. A `timeout` of zero never blocks; `None`, or a timeout too
/// large to represent as a deadline, waits forever.
///
/// # Errors
///
/// `Interrupted` if the calling task is cancelled while waiting.
pub fn poll(fds: &mut [PollFd<'_>], timeout: Option<Duration>) -> KernelResult<usize> {
    let immediate = timeout == Some(Duration::ZERO);
    let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

    loop {
        let waiter = Waiter::new();
        // A poll that cannot block leaves nothing behind on the devices
        let enqueue = (!immediate).then_some(&waiter);
        let mut ready = 0;
        for fd in fds.iter_mut() {
            fd.revents = fd.file.poll_setup(fd.events, enqueue);
            if !fd.revents.is_empty() {
                ready += 1;
            }
        }

        if ready > 0 || immediate {
            // Queues still holding this waiter skip it from now on
            waiter.abandon();
            return Ok(ready);
        }

        match waiter.wait_until(deadline)? {
            WaitOutcome::Notified => continue,
            WaitOutcome::TimedOut => return Ok(0),
        }
    }
}
