// src/sync/mod.rs

//! Synchronization primitives and lock management
//!
//! This module provides the blocking and locking building blocks the pipe
//! driver is made of.
//!
//! # Lock Ordering
//!
//! Locks must be acquired in a specific order to prevent deadlocks:
//! 1. Pipe device state lock
//! 2. Slot table lock
//! 3. Device registry lock
//! 4. Buffer pool lock
//!
//! The construction path of a pipe takes the slot table lock and then the
//! registry lock; the teardown path takes a device lock, then the slot
//! table, then the registry. No path ever takes a device lock while holding
//! one of the later locks.
//!
//! # Example
//!
//! ```
//! use tiny_pipes::sync::{LockId, OrderedMutex};
//!
//! let device = OrderedMutex::new(LockId::Device, 0u32);
//! let slots = OrderedMutex::new(LockId::Slots, 0u32);
//!
//! // Acquire locks in the correct order
//! let _device = device.lock();
//! let _slots = slots.lock();
//! // Locks are automatically released when dropped
//! ```
//!
//! # Safety
//!
//! Lock ordering is enforced at runtime in debug builds. Acquiring locks out
//! of order panics there, and is logged in release builds.

pub mod lock_manager;
pub mod wait_queue;

// Re-export commonly used types
pub use lock_manager::{
    LockId, LockOrderViolation, LockStats, OrderedGuard, OrderedMutex, lock_stats,
};
pub use wait_queue::{WaitOutcome, WaitQueue, Waiter};
