// src/lib.rs
//! Tiny Pipes - named pipe driver
//!
//! A minor-number allocator hands out up to 32 pipe slots; each slot is
//! backed by a device at `/dev/pipeN` holding a fixed-size ring buffer
//! shared by every handle opened on it. Reads and writes block the calling
//! task, half-closes propagate as end of stream or `BrokenPipe`, and the
//! last close hands the slot back.
//!
//! # Example
//!
//! ```
//! use std::thread;
//!
//! let (reader, writer) = tiny_pipes::pipe().unwrap();
//!
//! let producer = thread::spawn(move || {
//!     writer.write(b"ping").unwrap();
//! });
//!
//! let mut buf = [0u8; 4];
//! let mut filled = 0;
//! while filled < buf.len() {
//!     filled += reader.read(&mut buf[filled..]).unwrap();
//! }
//! assert_eq!(&buf, b"ping");
//! producer.join().unwrap();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod constants;
pub mod kernel;
pub mod sync;

pub use config::{PipeConfig, TeardownPolicy};
pub use kernel::core::{ErrorKind, KernelError, KernelResult, OpenFlags, PollEvents, SlotId, TaskId};
pub use kernel::fs::pipe::{PIPES, PipeDevice, PipeDriver, PipeSlotTable, pipe};
pub use kernel::fs::{DeviceRegistry, File, FileOperations, IoctlCommand, PollFd, poll};
pub use kernel::mm::{BufferPool, HeapStats};
pub use kernel::task::{Task, TaskHandle};
