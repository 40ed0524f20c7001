// src/kernel/core/result.rs
//! Common error handling for the driver
//!
//! Errors carry an optional static context string to make debugging easier.
//! Every [`ErrorKind`] maps onto a POSIX errno value.

use std::fmt;
use std::io;

/// Driver `Result` type
pub type KernelResult<T> = Result<T, KernelError>;

/// Driver error (with context information)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    /// Creates a new error
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// Creates an error with context information
    #[inline]
    pub const fn with_context(kind: ErrorKind, ctx: &'static str) -> Self {
        Self { kind, context: Some(ctx) }
    }

    /// Returns the error kind
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context, if any
    #[inline]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }

    /// Returns the POSIX errno for this error
    #[inline]
    pub const fn errno(&self) -> i32 {
        self.kind.errno()
    }

    /// Resource exhaustion errors can be retried by the caller
    #[inline]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(self.kind, ErrorKind::TooManyOpenFiles | ErrorKind::OutOfMemory)
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Every pipe slot is occupied (`ENFILE`)
    TooManyOpenFiles,
    /// The buffer pool could not satisfy an allocation (`ENOMEM`)
    OutOfMemory,
    /// The device path could not be registered (`EEXIST`)
    RegistrationFailed,
    /// Write with no reader left (`EPIPE`)
    BrokenPipe,
    /// Non-blocking operation could not make progress (`EAGAIN`)
    WouldBlock,
    /// A blocked operation was cancelled (`EINTR`)
    Interrupted,
    /// No device is registered under the path (`ENOENT`)
    NotFound,
    /// Handle is closed or not open for this access mode (`EBADF`)
    BadDescriptor,
    /// Invalid argument (`EINVAL`)
    InvalidArgument,
    /// Operation not supported by the device (`ENOTTY`)
    NotSupported,
}

impl ErrorKind {
    /// POSIX errno value (positive)
    pub const fn errno(self) -> i32 {
        match self {
            Self::TooManyOpenFiles => 23,
            Self::OutOfMemory => 12,
            Self::RegistrationFailed => 17,
            Self::BrokenPipe => 32,
            Self::WouldBlock => 11,
            Self::Interrupted => 4,
            Self::NotFound => 2,
            Self::BadDescriptor => 9,
            Self::InvalidArgument => 22,
            Self::NotSupported => 25,
        }
    }

    /// Returns a string representation of the error kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TooManyOpenFiles => "too many open files",
            Self::OutOfMemory => "out of memory",
            Self::RegistrationFailed => "device registration failed",
            Self::BrokenPipe => "broken pipe",
            Self::WouldBlock => "operation would block",
            Self::Interrupted => "interrupted",
            Self::NotFound => "no such device",
            Self::BadDescriptor => "bad file descriptor",
            Self::InvalidArgument => "invalid argument",
            Self::NotSupported => "operation not supported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(ctx) = self.context {
            write!(f, " (context: {})", ctx)?;
        }

        Ok(())
    }
}

impl std::error::Error for KernelError {}

impl From<ErrorKind> for KernelError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        KernelError::new(kind)
    }
}

impl From<KernelError> for io::Error {
    fn from(err: KernelError) -> Self {
        let kind = match err.kind {
            ErrorKind::BrokenPipe => io::ErrorKind::BrokenPipe,
            ErrorKind::WouldBlock => io::ErrorKind::WouldBlock,
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::OutOfMemory => io::ErrorKind::OutOfMemory,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::NotSupported => io::ErrorKind::Unsupported,
            ErrorKind::RegistrationFailed => io::ErrorKind::AlreadyExists,
            ErrorKind::TooManyOpenFiles | ErrorKind::BadDescriptor => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
