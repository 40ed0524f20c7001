// src/kernel/core/mod.rs
//! Core types shared by every driver module

pub mod prelude;
pub mod result;
pub mod types;

pub use result::{ErrorKind, KernelError, KernelResult};
pub use types::{OpenFlags, PollEvents, SlotId, TaskId};
