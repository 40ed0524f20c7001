// src/constants.rs

//! Driver constants and configuration defaults
//!
//! This module centralizes the constant values used by the pipe driver.
//! They play the role of the board configuration (`CONFIG_DEV_PIPE_SIZE`
//! and friends) and are only read when a [`PipeConfig`] is built.
//!
//! [`PipeConfig`]: crate::config::PipeConfig

/// Number of pipe minor numbers managed by one slot table.
///
/// The slot table tracks occupancy in a 32-bit wide table, so this is also
/// the hard upper bound for `PipeConfig::max_pipes`.
pub const MAX_PIPES: usize = 32;

/// Default ring buffer capacity of a pipe device, in bytes
pub const DEV_PIPE_SIZE: usize = 1024;

/// Prefix of every pipe device path; the slot number is appended
pub const DEV_PIPE_PREFIX: &str = "/dev/pipe";

/// Default size of the buffer pool arena, in bytes.
///
/// Large enough to back every slot at the default pipe size, with
/// headroom for allocator bookkeeping.
pub const DEFAULT_POOL_SIZE: usize = (MAX_PIPES + 1) * (DEV_PIPE_SIZE + 64);

/// Default number of nodes the device registry accepts
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Smallest arena the buffer pool accepts.
///
/// The heap needs room for its own free-list node.
pub const MIN_POOL_SIZE: usize = 64;

/// Builds the device path for a slot (`/dev/pipeN`)
pub fn pipe_path(slot: usize) -> String {
    format!("{DEV_PIPE_PREFIX}{slot}")
}
