//! Pipe minor number allocator
//!
//! Each slot carries two independent flags. `occupied` says the number is
//! handed out to a live pipe; `created` says a device for the number exists
//! and is registered at `/dev/pipeN`. A device may outlive its occupancy
//! (see [`TeardownPolicy::Persistent`](crate::TeardownPolicy)), which is
//! why the flags are kept apart.

use std::fmt;
use std::sync::{Arc, Weak};

use super::device::PipeDevice;
use crate::kernel::core::{ErrorKind, KernelError, KernelResult, SlotId};
use crate::kernel::task;
use crate::sync::{LockId, OrderedGuard, OrderedMutex};

#[derive(Debug, Default)]
struct SlotState {
    occupied: bool,
    created: bool,
    device: Weak<PipeDevice>,
}

/// Slot table shared by a driver and all of its devices
pub struct PipeSlotTable {
    slots: OrderedMutex<Vec<SlotState>>,
}

impl PipeSlotTable {
    /// Creates a table of `max_pipes` free slots
    pub fn new(max_pipes: usize) -> Self {
        let slots = (0..max_pipes).map(|_| SlotState::default()).collect();
        Self {
            slots: OrderedMutex::new(LockId::Slots, slots),
        }
    }

    /// Locks the table
    pub(crate) fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            slots: self.slots.lock(),
        }
    }

    /// Locks the table unless the calling task has a cancellation pending
    pub(crate) fn lock_interruptible(&self) -> KernelResult<SlotGuard<'_>> {
        task::current().check_cancel()?;
        Ok(self.lock())
    }

    /// Returns `slot` to the free pool; idempotent
    pub fn free(&self, slot: SlotId) {
        self.lock().free(slot);
    }

    /// A device exists for `slot`
    pub fn is_created(&self, slot: SlotId) -> bool {
        self.lock().is_created(slot)
    }

    /// `slot` is handed out
    pub fn is_occupied(&self, slot: SlotId) -> bool {
        self.lock().is_occupied(slot)
    }

    /// Number of slots handed out
    pub fn occupied_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.occupied).count()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }
}

impl fmt::Debug for PipeSlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        let occupied: Vec<usize> = (0..slots.len()).filter(|&i| slots[i].occupied).collect();
        let created: Vec<usize> = (0..slots.len()).filter(|&i| slots[i].created).collect();
        f.debug_struct("PipeSlotTable")
            .field("capacity", &slots.len())
            .field("occupied", &occupied)
            .field("created", &created)
            .finish()
    }
}

/// Locked view of the slot table
pub(crate) struct SlotGuard<'a> {
    slots: OrderedGuard<'a, Vec<SlotState>>,
}

impl SlotGuard<'_> {
    /// Hands out the lowest free slot
    pub fn allocate(&mut self) -> KernelResult<SlotId> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or(KernelError::with_context(
                ErrorKind::TooManyOpenFiles,
                "all pipe slots in use",
            ))?;
        self.slots[index].occupied = true;
        log::trace!("pipe slots: allocated {}", index);
        Ok(SlotId(index))
    }

    pub fn free(&mut self, slot: SlotId) {
        match self.slots.get_mut(slot.index()) {
            Some(state) => {
                state.occupied = false;
                log::trace!("pipe slots: freed {}", slot);
            }
            None => log::warn!("pipe slots: free of invalid slot {}", slot),
        }
    }

    pub fn is_occupied(&self, slot: SlotId) -> bool {
        self.slots.get(slot.index()).is_some_and(|s| s.occupied)
    }

    pub fn is_created(&self, slot: SlotId) -> bool {
        self.slots.get(slot.index()).is_some_and(|s| s.created)
    }

    /// Binds `device` to `slot`
    pub fn mark_created(&mut self, slot: SlotId, device: &Arc<PipeDevice>) {
        if let Some(state) = self.slots.get_mut(slot.index()) {
            state.created = true;
            state.device = Arc::downgrade(device);
        }
    }

    /// Clears the created flag if `slot` is still bound to `device`
    pub fn clear_created_if(&mut self, slot: SlotId, device: *const PipeDevice) {
        if let Some(state) = self.slots.get_mut(slot.index()) {
            if state.created && std::ptr::eq(state.device.as_ptr(), device) {
                state.created = false;
                state.device = Weak::new();
            }
        }
    }

    /// Device bound to `slot`, if it still exists
    pub fn created_device(&mut self, slot: SlotId) -> Option<Arc<PipeDevice>> {
        let state = self.slots.get_mut(slot.index())?;
        if !state.created {
            return None;
        }
        let device = state.device.upgrade();
        if device.is_none() {
            // Device dropped without retiring (e.g. registry entry replaced)
            state.created = false;
        }
        device
    }
}
