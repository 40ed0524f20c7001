// src/kernel/mod.rs
//! Driver internals
//!
//! The layout follows the kernel this driver belongs to: shared types and
//! errors in `core`, the file layer (registry, handles, pipes) in `fs`,
//! the buffer pool in `mm` and task identity and cancellation in `task`.

pub mod core;
pub mod fs;
pub mod mm;
pub mod task;
