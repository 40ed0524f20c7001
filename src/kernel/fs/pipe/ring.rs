//! Fixed-capacity byte ring
//!
//! Storage comes from the [`BufferPool`](crate::kernel::mm::BufferPool) and
//! the whole capacity is usable: fullness is tracked by length, not by a
//! sacrificed slot.

use crate::kernel::mm::PoolBlock;

/// Byte ring buffer over a pool block
#[derive(Debug)]
pub(crate) struct RingBuffer {
    storage: PoolBlock,
    head: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(storage: PoolBlock) -> Self {
        Self {
            storage,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn free_space(&self) -> usize {
        self.capacity() - self.len
    }

    /// Appends as much of `src` as fits, returning the number of bytes taken
    pub fn push(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.free_space());
        if count == 0 {
            return 0;
        }

        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = count.min(cap - tail);
        let buf = self.storage.as_mut_slice();
        buf[tail..tail + first].copy_from_slice(&src[..first]);
        buf[..count - first].copy_from_slice(&src[first..count]);

        self.len += count;
        count
    }

    /// Removes up to `dst.len()` bytes in FIFO order
    pub fn pop(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.len);
        if count == 0 {
            return 0;
        }

        let cap = self.capacity();
        let first = count.min(cap - self.head);
        let buf = self.storage.as_slice();
        dst[..first].copy_from_slice(&buf[self.head..self.head + first]);
        dst[first..count].copy_from_slice(&buf[..count - first]);

        self.head = (self.head + count) % cap;
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
        }
        count
    }
}
