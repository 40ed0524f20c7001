//! File system layer
//!
//! Devices plug into the registry through the [`FileOperations`] trait and
//! are reached by path. Opening a path yields a [`File`], which routes every
//! call to the device together with the flags it was opened with.

pub mod pipe;
pub mod poll;
pub mod registry;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::TeardownPolicy;
use crate::kernel::core::{ErrorKind, KernelError, KernelResult, OpenFlags, PollEvents};
use crate::sync::Waiter;

pub use poll::{PollFd, poll};
pub use registry::DeviceRegistry;

/// Device control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCommand {
    /// Bytes that can be read without blocking (`FIONREAD`)
    BytesAvailable,
    /// Bytes that can be written without blocking (`FIONSPACE`)
    FreeSpace,
    /// Total buffer capacity
    Capacity,
    /// Changes what happens to the device after its last close
    SetPolicy(TeardownPolicy),
}

/// Device capability interface
///
/// Every call carries the flags of the handle it is made through, so a
/// single device instance can serve readers and writers alike.
pub trait FileOperations: Send + Sync {
    /// A new handle is being opened. May block (e.g. a FIFO reader waiting
    /// for its writer) unless `flags` contains `NONBLOCK`.
    fn open(&self, flags: OpenFlags) -> KernelResult<()>;

    /// An existing handle is being duplicated; must not block
    fn dup(&self, flags: OpenFlags) -> KernelResult<()> {
        self.open(flags | OpenFlags::NONBLOCK)
    }

    /// A handle opened with `flags` is gone
    fn close(&self, flags: OpenFlags) -> KernelResult<()>;

    /// Reads into `buf`, returning the number of bytes read (0 at end of stream)
    fn read(&self, flags: OpenFlags, buf: &mut [u8]) -> KernelResult<usize>;

    /// Writes from `buf`, returning the number of bytes written
    fn write(&self, flags: OpenFlags, buf: &[u8]) -> KernelResult<usize>;

    /// Reports readiness for `interest`.
    ///
    /// When nothing is ready and `waiter` is given, the device enqueues it
    /// and notifies it on the next state change.
    fn poll(
        &self,
        flags: OpenFlags,
        interest: PollEvents,
        waiter: Option<&Arc<Waiter>>,
    ) -> PollEvents;

    /// Device specific control
    fn ioctl(&self, _cmd: IoctlCommand) -> KernelResult<usize> {
        Err(KernelError::new(ErrorKind::NotSupported))
    }

    /// The device's path was removed from the registry
    fn unlink(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// Open file handle
///
/// Closing happens on drop; use [`File::close`] to observe the result.
pub struct File {
    path: String,
    flags: OpenFlags,
    ops: Arc<dyn FileOperations>,
    open: AtomicBool,
}

impl File {
    /// Wraps a handle the device has already accounted for
    pub(crate) fn new(path: String, flags: OpenFlags, ops: Arc<dyn FileOperations>) -> Self {
        Self {
            path,
            flags,
            ops,
            open: AtomicBool::new(true),
        }
    }

    /// Registry path this handle was opened through
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flags this handle was opened with
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Switches the handle between blocking and non-blocking mode
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.flags.set(OpenFlags::NONBLOCK, nonblocking);
    }

    fn ensure_open(&self) -> KernelResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(KernelError::with_context(ErrorKind::BadDescriptor, "handle is closed"))
        }
    }

    /// Reads up to `buf.len()` bytes
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        self.ensure_open()?;
        if !self.flags.readable() {
            return Err(KernelError::with_context(ErrorKind::BadDescriptor, "not open for reading"));
        }
        self.ops.read(self.flags, buf)
    }

    /// Writes `buf`, blocking until all of it is accepted (or the handle is
    /// non-blocking)
    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        self.ensure_open()?;
        if !self.flags.writable() {
            return Err(KernelError::with_context(ErrorKind::BadDescriptor, "not open for writing"));
        }
        self.ops.write(self.flags, buf)
    }

    /// Current readiness, without blocking
    pub fn poll(&self, interest: PollEvents) -> PollEvents {
        self.poll_setup(interest, None)
    }

    pub(crate) fn poll_setup(
        &self,
        interest: PollEvents,
        waiter: Option<&Arc<Waiter>>,
    ) -> PollEvents {
        if !self.open.load(Ordering::Acquire) {
            return PollEvents::NVAL;
        }
        self.ops.poll(self.flags, interest, waiter)
    }

    /// Device control
    pub fn ioctl(&self, cmd: IoctlCommand) -> KernelResult<usize> {
        self.ensure_open()?;
        self.ops.ioctl(cmd)
    }

    /// Opens a second handle on the same device with the same flags
    pub fn try_clone(&self) -> KernelResult<File> {
        self.ensure_open()?;
        self.ops.dup(self.flags)?;
        Ok(File::new(self.path.clone(), self.flags, Arc::clone(&self.ops)))
    }

    /// Closes the handle, reporting the device's verdict
    pub fn close(self) -> KernelResult<()> {
        self.release()
    }

    fn release(&self) -> KernelResult<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.ops.close(self.flags)
        } else {
            Ok(())
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("{}: close failed: {}", self.path, err);
        }
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

impl io::Read for &File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for &File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
