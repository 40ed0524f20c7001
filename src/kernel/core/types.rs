// src/kernel/core/types.rs
//! Common type definitions

use std::fmt;

use bitflags::bitflags;

/// Task ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Pipe minor number (index into the slot table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl SlotId {
    /// Raw slot index
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Flags a file handle was opened with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Open for reading
        const READ = 1 << 0;
        /// Open for writing
        const WRITE = 1 << 1;
        /// Fail with `WouldBlock` instead of blocking
        const NONBLOCK = 1 << 2;
    }
}

impl OpenFlags {
    /// `O_RDONLY`
    pub const RDONLY: Self = Self::READ;
    /// `O_WRONLY`
    pub const WRONLY: Self = Self::WRITE;
    /// `O_RDWR`
    pub const RDWR: Self = Self::READ.union(Self::WRITE);

    /// Handle may read
    #[inline]
    pub const fn readable(self) -> bool {
        self.contains(Self::READ)
    }

    /// Handle may write
    #[inline]
    pub const fn writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Handle never blocks
    #[inline]
    pub const fn nonblocking(self) -> bool {
        self.contains(Self::NONBLOCK)
    }
}

bitflags! {
    /// poll(2) event mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PollEvents: u16 {
        /// Data can be read without blocking (or end of stream reached)
        const IN = 0x01;
        /// Data can be written without blocking
        const OUT = 0x04;
        /// Write side error: no reader left
        const ERR = 0x08;
        /// Hang up: no writer left
        const HUP = 0x10;
        /// Handle is not open
        const NVAL = 0x20;
    }
}
