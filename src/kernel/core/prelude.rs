//! Core prelude
//!
//! `use tiny_pipes::kernel::core::prelude::*;` imports the commonly used types and traits

pub use super::result::{ErrorKind, KernelError, KernelResult};
pub use super::types::{OpenFlags, PollEvents, SlotId, TaskId};
pub use crate::kernel::fs::{File, FileOperations, IoctlCommand};
