//! Pipe device
//!
//! One device backs one slot. All handles opened on it share a single ring
//! buffer and a pair of reference counts (readers and writers). The counts
//! drive every blocking decision:
//!
//! - reading an empty buffer blocks while writers remain, and reports end
//!   of stream once they are gone
//! - writing blocks while the buffer is full, and fails with `BrokenPipe`
//!   as soon as no reader remains
//! - the last close releases the buffer and hands the slot back
//!
//! The device lock is never held while blocking. Waiters are enqueued under
//! it and wakers run under it, so a state change cannot be missed.

use std::fmt;
use std::sync::{Arc, Weak};

use super::ring::RingBuffer;
use super::slots::PipeSlotTable;
use crate::config::TeardownPolicy;
use crate::kernel::core::{ErrorKind, KernelError, KernelResult, OpenFlags, PollEvents, SlotId};
use crate::kernel::fs::{DeviceRegistry, FileOperations, IoctlCommand};
use crate::kernel::mm::BufferPool;
use crate::sync::{LockId, OrderedMutex, WaitQueue, Waiter};

#[derive(Debug)]
struct PipeState {
    /// Present while the device holds its slot
    ring: Option<RingBuffer>,
    readers: usize,
    writers: usize,
    policy: TeardownPolicy,
    /// Path removed from the registry
    unlinked: bool,
    /// Device is finished; it will never be opened again
    retired: bool,
    /// The device owns its slot's occupancy and must free it
    slot_held: bool,
}

impl PipeState {
    fn refs(&self) -> usize {
        self.readers + self.writers
    }

    fn available(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::len)
    }

    fn free_space(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::free_space)
    }
}

/// Named pipe device registered at `/dev/pipeN`
pub struct PipeDevice {
    slot: SlotId,
    path: String,
    capacity: usize,
    state: OrderedMutex<PipeState>,
    readers_waiting: WaitQueue,
    writers_waiting: WaitQueue,
    open_waiting: WaitQueue,
    poll_waiting: WaitQueue,
    pool: Arc<BufferPool>,
    slots: Arc<PipeSlotTable>,
    registry: Weak<DeviceRegistry>,
}

impl PipeDevice {
    /// Creates a device for `slot` that owns the slot's occupancy.
    ///
    /// The reader and writer of the creating `pipe()` are attached from the
    /// start, so the device cannot be torn down before they are handed out.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the pool cannot provide the ring storage.
    pub(crate) fn new(
        slot: SlotId,
        path: String,
        capacity: usize,
        policy: TeardownPolicy,
        pool: &Arc<BufferPool>,
        slots: &Arc<PipeSlotTable>,
        registry: &Arc<DeviceRegistry>,
    ) -> KernelResult<Arc<Self>> {
        let ring = RingBuffer::new(pool.allocate(capacity)?);
        log::debug!("{}: device created ({} byte buffer, {:?})", path, capacity, policy);

        Ok(Arc::new(Self {
            slot,
            path,
            capacity,
            state: OrderedMutex::new(
                LockId::Device,
                PipeState {
                    ring: Some(ring),
                    readers: 1,
                    writers: 1,
                    policy,
                    unlinked: false,
                    retired: false,
                    slot_held: true,
                },
            ),
            readers_waiting: WaitQueue::new("pipe readers"),
            writers_waiting: WaitQueue::new("pipe writers"),
            open_waiting: WaitQueue::new("pipe open"),
            poll_waiting: WaitQueue::new("pipe poll"),
            pool: Arc::clone(pool),
            slots: Arc::clone(slots),
            registry: Arc::downgrade(registry),
        }))
    }

    /// Slot this device is bound to
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Registry path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ring buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open reader and writer counts
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.readers, state.writers)
    }

    /// Reactivates a reused device for a new `pipe()`: takes over the slot
    /// occupancy and attaches one reader and one writer.
    ///
    /// # Errors
    ///
    /// `NotFound` if the device was retired in the meantime, `OutOfMemory`
    /// when the ring cannot be allocated. The device is unchanged on error.
    pub(crate) fn claim(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        if state.retired {
            return Err(KernelError::with_context(ErrorKind::NotFound, "pipe device retired"));
        }
        if state.ring.is_none() {
            state.ring = Some(RingBuffer::new(self.pool.allocate(self.capacity)?));
        }
        state.slot_held = true;
        log::trace!("{}: reusing device", self.path);
        self.attach(&mut state, OpenFlags::RDWR);
        Ok(())
    }

    fn attach(&self, state: &mut PipeState, flags: OpenFlags) {
        if flags.readable() {
            state.readers += 1;
        }
        if flags.writable() {
            state.writers += 1;
            if state.writers == 1 {
                self.open_waiting.wake_all();
            }
        }
        self.poll_waiting.wake_all();
        log::trace!(
            "{}: opened {:?} (readers {}, writers {})",
            self.path,
            flags,
            state.readers,
            state.writers
        );
    }

    /// Last reference is gone
    fn release(&self, state: &mut PipeState) {
        state.ring = None;

        if (state.unlinked || state.policy == TeardownPolicy::OnLastClose) && !state.retired {
            self.retire(state);
        }
        self.free_slot(state);
    }

    fn free_slot(&self, state: &mut PipeState) {
        if state.slot_held {
            state.slot_held = false;
            self.slots.free(self.slot);
        }
        // Blocked openers must notice the device went inactive
        self.open_waiting.wake_all();
    }

    fn retire(&self, state: &mut PipeState) {
        state.retired = true;
        if !state.unlinked {
            if let Some(registry) = self.registry.upgrade() {
                registry.unregister_if_same(&self.path, self);
            }
        }
        self.slots.lock().clear_created_if(self.slot, self);
        log::debug!("{}: device retired", self.path);
    }
}

impl FileOperations for PipeDevice {
    fn open(&self, flags: OpenFlags) -> KernelResult<()> {
        let mut state = self.state.lock();

        loop {
            if state.retired || !state.slot_held {
                return Err(KernelError::with_context(ErrorKind::NotFound, "pipe is not active"));
            }

            // A reader opening by path waits for a writer, unless there is
            // still data left to drain
            let wait_for_writer = flags == OpenFlags::RDONLY
                && state.writers == 0
                && state.available() == 0;
            if !wait_for_writer {
                break;
            }

            let waiter = Waiter::new();
            self.open_waiting.push(Arc::clone(&waiter));
            drop(state);
            waiter.wait()?;
            state = self.state.lock();
        }

        self.attach(&mut state, flags);
        Ok(())
    }

    fn dup(&self, flags: OpenFlags) -> KernelResult<()> {
        let mut state = self.state.lock();
        if state.ring.is_none() {
            return Err(KernelError::with_context(ErrorKind::BadDescriptor, "pipe is not open"));
        }
        self.attach(&mut state, flags);
        Ok(())
    }

    fn close(&self, flags: OpenFlags) -> KernelResult<()> {
        let mut state = self.state.lock();

        if flags.readable() {
            state.readers = state.readers.saturating_sub(1);
            if state.readers == 0 {
                // Blocked writers now fail with BrokenPipe
                self.writers_waiting.wake_all();
            }
        }
        if flags.writable() {
            state.writers = state.writers.saturating_sub(1);
            if state.writers == 0 {
                // Blocked readers now see end of stream
                self.readers_waiting.wake_all();
            }
        }
        self.poll_waiting.wake_all();

        log::trace!(
            "{}: closed {:?} (readers {}, writers {})",
            self.path,
            flags,
            state.readers,
            state.writers
        );

        if state.refs() == 0 {
            self.release(&mut state);
        }
        Ok(())
    }

    fn read(&self, flags: OpenFlags, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let mut state = self.state.lock();
            let ring = state
                .ring
                .as_mut()
                .ok_or(KernelError::with_context(ErrorKind::BadDescriptor, "pipe is not open"))?;

            if !ring.is_empty() {
                let count = ring.pop(buf);
                let more = !ring.is_empty();
                self.writers_waiting.wake_one();
                if more {
                    self.readers_waiting.wake_one();
                }
                self.poll_waiting.wake_all();
                return Ok(count);
            }

            if state.writers == 0 {
                return Ok(0);
            }
            if flags.nonblocking() {
                return Err(KernelError::new(ErrorKind::WouldBlock));
            }

            let waiter = Waiter::new();
            self.readers_waiting.push(Arc::clone(&waiter));
            drop(state);
            waiter.wait()?;
        }
    }

    fn write(&self, flags: OpenFlags, buf: &[u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        loop {
            let mut state = self.state.lock();
            if state.readers == 0 {
                log::warn!(
                    "{}: write with no readers ({} of {} bytes written)",
                    self.path,
                    written,
                    buf.len()
                );
                return Err(KernelError::with_context(ErrorKind::BrokenPipe, "no readers left"));
            }

            let ring = state
                .ring
                .as_mut()
                .ok_or(KernelError::with_context(ErrorKind::BadDescriptor, "pipe is not open"))?;

            let count = ring.push(&buf[written..]);
            if count > 0 {
                written += count;
                self.readers_waiting.wake_one();
                self.poll_waiting.wake_all();
            }

            if written == buf.len() {
                if !ring.is_full() {
                    self.writers_waiting.wake_one();
                }
                return Ok(written);
            }

            if flags.nonblocking() {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(KernelError::new(ErrorKind::WouldBlock))
                };
            }

            let waiter = Waiter::new();
            self.writers_waiting.push(Arc::clone(&waiter));
            drop(state);
            if let Err(err) = waiter.wait() {
                return if written > 0 { Ok(written) } else { Err(err) };
            }
        }
    }

    fn poll(
        &self,
        flags: OpenFlags,
        interest: PollEvents,
        waiter: Option<&Arc<Waiter>>,
    ) -> PollEvents {
        let state = self.state.lock();

        let mut ready = PollEvents::empty();
        if flags.readable() {
            if state.available() > 0 || state.writers == 0 {
                ready |= PollEvents::IN;
            }
            if state.writers == 0 {
                ready |= PollEvents::HUP;
            }
        }
        if flags.writable() {
            if state.free_space() > 0 && state.readers > 0 {
                ready |= PollEvents::OUT;
            }
            if state.readers == 0 {
                ready |= PollEvents::ERR;
            }
        }

        let ready = ready & (interest | PollEvents::ERR | PollEvents::HUP);
        if ready.is_empty() {
            if let Some(waiter) = waiter {
                self.poll_waiting.push(Arc::clone(waiter));
            }
        }
        ready
    }

    fn ioctl(&self, cmd: IoctlCommand) -> KernelResult<usize> {
        let mut state = self.state.lock();
        match cmd {
            IoctlCommand::BytesAvailable => Ok(state.available()),
            IoctlCommand::FreeSpace => Ok(state.free_space()),
            IoctlCommand::Capacity => Ok(self.capacity),
            IoctlCommand::SetPolicy(policy) => {
                log::debug!("{}: teardown policy {:?}", self.path, policy);
                state.policy = policy;
                Ok(0)
            }
        }
    }

    fn unlink(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.unlinked = true;

        if state.refs() == 0 && !state.retired {
            self.retire(&mut state);
        }
        Ok(())
    }
}

impl fmt::Debug for PipeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeDevice")
            .field("slot", &self.slot)
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Drop for PipeDevice {
    fn drop(&mut self) {
        log::trace!("{}: device dropped", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        pool: Arc<BufferPool>,
        slots: Arc<PipeSlotTable>,
        registry: Arc<DeviceRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: BufferPool::new(1024),
                slots: Arc::new(PipeSlotTable::new(4)),
                registry: Arc::new(DeviceRegistry::new(8)),
            }
        }

        fn device(&self, capacity: usize, policy: TeardownPolicy) -> Arc<PipeDevice> {
            let slot = self.slots.lock().allocate().unwrap();
            let device = PipeDevice::new(
                slot,
                format!("/dev/pipe{}", slot),
                capacity,
                policy,
                &self.pool,
                &self.slots,
                &self.registry,
            )
            .unwrap();
            self.registry
                .register_driver(device.path(), 0o666, device.clone())
                .unwrap();
            self.slots.lock().mark_created(slot, &device);
            device
        }
    }

    #[test]
    fn test_read_write_through_ring() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::OnLastClose);
        assert_eq!(dev.counts(), (1, 1));

        assert_eq!(dev.write(OpenFlags::WRONLY, b"hello").unwrap(), 5);
        assert_eq!(dev.ioctl(IoctlCommand::BytesAvailable).unwrap(), 5);
        assert_eq!(dev.ioctl(IoctlCommand::FreeSpace).unwrap(), 3);

        let mut buf = [0u8; 3];
        assert_eq!(dev.read(OpenFlags::RDONLY, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
    }

    #[test]
    fn test_last_close_retires_and_frees() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::OnLastClose);
        let slot = dev.slot();

        dev.close(OpenFlags::WRONLY).unwrap();
        assert!(fx.slots.is_occupied(slot));
        dev.close(OpenFlags::RDONLY).unwrap();

        assert!(!fx.slots.is_occupied(slot));
        assert!(!fx.slots.is_created(slot));
        assert!(!fx.registry.contains(dev.path()));
        assert_eq!(fx.pool.stats().current_usage, 0);
        assert_eq!(dev.open(OpenFlags::WRONLY).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_opener_cannot_tear_down_fresh_pair() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::OnLastClose);

        // Another task joins by path and leaves again
        dev.open(OpenFlags::WRONLY).unwrap();
        dev.close(OpenFlags::WRONLY).unwrap();

        assert!(fx.registry.contains(dev.path()));
        assert_eq!(dev.counts(), (1, 1));
        assert_eq!(dev.write(OpenFlags::WRONLY, b"ok").unwrap(), 2);
    }

    #[test]
    fn test_persistent_device_survives_close() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::Persistent);
        let slot = dev.slot();
        dev.close(OpenFlags::WRONLY).unwrap();
        dev.close(OpenFlags::RDONLY).unwrap();

        assert!(!fx.slots.is_occupied(slot));
        assert!(fx.slots.is_created(slot));
        assert!(fx.registry.contains(dev.path()));
        assert_eq!(fx.pool.stats().current_usage, 0);

        // inactive until a pipe() takes the slot again
        assert_eq!(dev.open(OpenFlags::WRONLY).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(fx.slots.lock().allocate().unwrap(), slot);
        dev.claim().unwrap();
        assert_eq!(dev.counts(), (1, 1));
        assert_eq!(dev.ioctl(IoctlCommand::Capacity).unwrap(), 8);
        dev.open(OpenFlags::WRONLY).unwrap();
    }

    #[test]
    fn test_claim_without_memory_leaves_device_idle() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::Persistent);
        let slot = dev.slot();
        dev.close(OpenFlags::WRONLY).unwrap();
        dev.close(OpenFlags::RDONLY).unwrap();

        let mut hog = Vec::new();
        while let Ok(block) = fx.pool.allocate(8) {
            hog.push(block);
        }

        assert_eq!(fx.slots.lock().allocate().unwrap(), slot);
        assert_eq!(dev.claim().unwrap_err().kind(), ErrorKind::OutOfMemory);
        assert_eq!(dev.counts(), (0, 0));
        assert!(fx.slots.is_created(slot));
        assert_eq!(dev.open(OpenFlags::WRONLY).unwrap_err().kind(), ErrorKind::NotFound);

        drop(hog);
        dev.claim().unwrap();
        assert_eq!(dev.counts(), (1, 1));
    }

    #[test]
    fn test_write_without_reader_is_broken_pipe() {
        let fx = Fixture::new();
        let dev = fx.device(8, TeardownPolicy::OnLastClose);
        dev.close(OpenFlags::RDONLY).unwrap();

        let err = dev.write(OpenFlags::WRONLY, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_nonblocking_paths() {
        let fx = Fixture::new();
        let dev = fx.device(4, TeardownPolicy::OnLastClose);
        let wr = OpenFlags::WRONLY | OpenFlags::NONBLOCK;
        let rd = OpenFlags::RDONLY | OpenFlags::NONBLOCK;

        let mut buf = [0u8; 4];
        assert_eq!(dev.read(rd, &mut buf).unwrap_err().kind(), ErrorKind::WouldBlock);
        assert_eq!(dev.write(wr, b"abcdef").unwrap(), 4);
        assert_eq!(dev.write(wr, b"g").unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_poll_readiness() {
        let fx = Fixture::new();
        let dev = fx.device(2, TeardownPolicy::OnLastClose);
        let all = PollEvents::IN | PollEvents::OUT;

        assert_eq!(dev.poll(OpenFlags::RDONLY, all, None), PollEvents::empty());
        assert_eq!(dev.poll(OpenFlags::WRONLY, all, None), PollEvents::OUT);

        dev.write(OpenFlags::WRONLY, b"ab").unwrap();
        assert_eq!(dev.poll(OpenFlags::RDONLY, all, None), PollEvents::IN);
        assert_eq!(dev.poll(OpenFlags::WRONLY, all, None), PollEvents::empty());

        dev.close(OpenFlags::WRONLY).unwrap();
        assert_eq!(
            dev.poll(OpenFlags::RDONLY, all, None),
            PollEvents::IN | PollEvents::HUP
        );
    }

    #[test]
    fn test_poll_enqueues_waiter_when_idle() {
        let fx = Fixture::new();
        let dev = fx.device(2, TeardownPolicy::OnLastClose);

        let waiter = Waiter::new();
        assert!(dev.poll(OpenFlags::RDONLY, PollEvents::IN, Some(&waiter)).is_empty());
        dev.write(OpenFlags::WRONLY, b"a").unwrap();
        assert!(waiter.is_notified());
    }

    #[test]
    fn test_repeated_idle_polls_stay_bounded() {
        let fx = Fixture::new();
        let dev = fx.device(2, TeardownPolicy::OnLastClose);

        for _ in 0..10_000 {
            let waiter = Waiter::new();
            assert!(dev.poll(OpenFlags::RDONLY, PollEvents::IN, Some(&waiter)).is_empty());
            waiter.abandon();
        }
        assert!(dev.poll_waiting.len() <= 32, "poll queue grew to {}", dev.poll_waiting.len());

        let live = Waiter::new();
        dev.poll(OpenFlags::RDONLY, PollEvents::IN, Some(&live));
        dev.write(OpenFlags::WRONLY, b"a").unwrap();
        assert!(live.is_notified());
    }

    #[test]
    fn test_unlink_unreferenced_retires_at_once() {
        let fx = Fixture::new();
        let dev = fx.device(4, TeardownPolicy::Persistent);
        let slot = dev.slot();
        dev.close(OpenFlags::WRONLY).unwrap();
        dev.close(OpenFlags::RDONLY).unwrap();
        assert!(fx.slots.is_created(slot));

        fx.registry.unlink(dev.path()).unwrap();
        assert!(!fx.slots.is_created(slot));
        assert_eq!(dev.claim().unwrap_err().kind(), ErrorKind::NotFound);
    }
}
