// src/kernel/task/mod.rs
//! Task management
//!
//! Every OS thread that calls into the driver is a task. A task can be
//! cancelled from any other task: the request stays pending until the task
//! reaches a suspension point (a blocking read, write, open or poll), which
//! then returns [`ErrorKind::Interrupted`] and consumes the request. This is
//! the driver's equivalent of a signal interrupting `sem_wait()`.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle, Thread};

use crate::kernel::core::{ErrorKind, KernelError, KernelResult, TaskId};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Task = Task::for_current_thread();
}

struct TaskInner {
    id: TaskId,
    thread: Thread,
    cancel_pending: AtomicBool,
}

/// Handle to a task; cheap to clone and safe to send to other tasks
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    fn for_current_thread() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
                thread: thread::current(),
                cancel_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Name of the underlying thread, if it has one
    pub fn name(&self) -> Option<&str> {
        self.inner.thread.name()
    }

    /// Requests cancellation of the task's current (or next) blocking call
    pub fn cancel(&self) {
        log::debug!("{}: cancellation requested", self.inner.id);
        self.inner.cancel_pending.store(true, Ordering::SeqCst);
        self.inner.thread.unpark();
    }

    /// A cancellation request is waiting to be delivered
    pub fn is_cancel_pending(&self) -> bool {
        self.inner.cancel_pending.load(Ordering::SeqCst)
    }

    /// Consumes a pending cancellation request, returning whether one existed
    pub(crate) fn take_cancel(&self) -> bool {
        self.inner.cancel_pending.swap(false, Ordering::SeqCst)
    }

    /// Delivers a pending cancellation as `Interrupted`
    pub fn check_cancel(&self) -> KernelResult<()> {
        if self.take_cancel() {
            Err(KernelError::with_context(ErrorKind::Interrupted, "task cancelled"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn unpark(&self) {
        self.inner.thread.unpark();
    }

    pub(crate) fn is_current(&self) -> bool {
        self.inner.thread.id() == thread::current().id()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("cancel_pending", &self.is_cancel_pending())
            .finish()
    }
}

/// Returns the calling task
pub fn current() -> Task {
    CURRENT.with(Task::clone)
}

/// A spawned task together with its join handle
#[derive(Debug)]
pub struct TaskHandle<T> {
    task: Task,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// The spawned task
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Shorthand for `task().cancel()`
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Waits for the task to finish
    pub fn join(self) -> thread::Result<T> {
        self.join.join()
    }
}

/// Spawns a named task
pub fn spawn<F, T>(name: &str, f: F) -> io::Result<TaskHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let join = thread::Builder::new().name(name.to_owned()).spawn(move || {
        // The receiver only disappears if the spawner panicked
        let _ = tx.send(current());
        f()
    })?;

    let task = rx
        .recv()
        .map_err(|_| io::Error::other("task exited before reporting its identity"))?;

    Ok(TaskHandle { task, join })
}
