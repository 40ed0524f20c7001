// src/sync/lock_manager.rs

//! Lock management and deadlock prevention
//!
//! Every driver lock is an [`OrderedMutex`] tagged with a [`LockId`].
//! This module provides:
//! - Lock ordering enforcement (per task, debug builds)
//! - Contention accounting
//! - Diagnostic information collection

use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use spin::mutex::{Mutex, MutexGuard};
use spin::relax::Yield;

/// Lock identifiers with defined ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockId {
    /// Per-device pipe state (must be acquired first)
    Device = 0,
    /// Slot table lock (may be taken while holding a device lock)
    Slots = 1,
    /// Device registry lock
    Registry = 2,
    /// Buffer pool heap (innermost)
    Pool = 3,
}

impl LockId {
    const fn bit(self) -> u8 {
        1u8 << (self as u8)
    }
}

/// Lock ordering violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOrderViolation {
    /// Lock already held by the current task
    AlreadyHeld(LockId),
    /// Attempting to acquire in wrong order
    OrderingViolation {
        /// Lock being acquired
        requested: LockId,
        /// Locks held at the time
        held_mask: u8,
    },
}

impl fmt::Display for LockOrderViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyHeld(id) => write!(f, "{:?} lock already held", id),
            Self::OrderingViolation { requested, held_mask } => {
                write!(f, "{:?} lock requested while holding mask {:#06b}", requested, held_mask)
            }
        }
    }
}

/// Lock statistics for diagnostics
#[derive(Debug, Clone, Copy)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Acquisitions that found the lock taken
    pub contentions: u64,
    /// Detected ordering violations
    pub ordering_violations: u64,
}

/// Global counters
struct LockManager {
    acquisition_count: AtomicU64,
    contention_count: AtomicU64,
    violation_count: AtomicU64,
}

impl LockManager {
    const fn new() -> Self {
        Self {
            acquisition_count: AtomicU64::new(0),
            contention_count: AtomicU64::new(0),
            violation_count: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisition_count.load(Ordering::Relaxed),
            contentions: self.contention_count.load(Ordering::Relaxed),
            ordering_violations: self.violation_count.load(Ordering::Relaxed),
        }
    }
}

static LOCK_MANAGER: LockManager = LockManager::new();

thread_local! {
    /// Locks currently held by this task (bitmask of `LockId`)
    static HELD_LOCKS: Cell<u8> = const { Cell::new(0) };
}

/// Validates that `id` may be acquired by the current task and marks it held.
fn check_acquire(id: LockId) -> Result<(), LockOrderViolation> {
    HELD_LOCKS.with(|held| {
        let current = held.get();

        if current & id.bit() != 0 {
            return Err(LockOrderViolation::AlreadyHeld(id));
        }

        // Every lock ordered at or after `id` must be free
        let later_mask = !(id.bit() - 1);
        if current & later_mask != 0 {
            return Err(LockOrderViolation::OrderingViolation {
                requested: id,
                held_mask: current,
            });
        }

        held.set(current | id.bit());
        Ok(())
    })
}

fn release(id: LockId) {
    HELD_LOCKS.with(|held| held.set(held.get() & !id.bit()));
}

/// Mask of locks the current task holds
pub fn held_mask() -> u8 {
    HELD_LOCKS.with(Cell::get)
}

/// Get lock statistics
pub fn lock_stats() -> LockStats {
    LOCK_MANAGER.stats()
}

/// Spin mutex that takes part in lock ordering
///
/// Tasks are preemptible threads, so a contended acquire yields the CPU
/// between attempts instead of burning the holder's time slice.
pub struct OrderedMutex<T> {
    id: LockId,
    inner: Mutex<T, Yield>,
}

impl<T> OrderedMutex<T> {
    /// Creates a new mutex with the given place in the lock order
    pub const fn new(id: LockId, value: T) -> Self {
        Self {
            id,
            inner: Mutex::new(value),
        }
    }

    /// Lock identifier
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Acquires the lock, yielding while it is contended.
    ///
    /// # Panics
    ///
    /// In debug builds, panics when acquiring would violate the lock order.
    pub fn lock(&self) -> OrderedGuard<'_, T> {
        if let Err(violation) = check_acquire(self.id) {
            LOCK_MANAGER.violation_count.fetch_add(1, Ordering::Relaxed);
            if cfg!(debug_assertions) {
                panic!("lock order violation: {}", violation);
            }
            log::error!("lock order violation: {}", violation);
        }

        let guard = match self.inner.try_lock() {
            Some(guard) => guard,
            None => {
                LOCK_MANAGER.contention_count.fetch_add(1, Ordering::Relaxed);
                self.inner.lock()
            }
        };
        LOCK_MANAGER.acquisition_count.fetch_add(1, Ordering::Relaxed);

        OrderedGuard { id: self.id, guard }
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMutex")
            .field("id", &self.id)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Lock acquisition guard that enforces proper release
pub struct OrderedGuard<'a, T> {
    id: LockId,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        release(self.id);
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedGuard")
            .field("id", &self.id)
            .field("value", &*self.guard)
            .finish()
    }
}
