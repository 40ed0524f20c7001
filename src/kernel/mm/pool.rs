// src/kernel/mm/pool.rs
//! Pipe buffer pool
//!
//! Ring buffer storage is carved out of a bounded arena managed by a
//! `linked_list_allocator::Heap`. Running the arena dry is how `ENOMEM`
//! reaches `pipe()`.

use std::alloc::Layout;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use linked_list_allocator::Heap;

use crate::constants::MIN_POOL_SIZE;
use crate::kernel::core::{ErrorKind, KernelError, KernelResult};
use crate::sync::{LockId, OrderedMutex};

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Arena capacity (size at initialization)
    pub heap_capacity: usize,
    /// Bytes currently handed out
    pub current_usage: usize,
    /// Highest `current_usage` observed
    pub peak_usage: usize,
    /// Successful allocations
    pub allocation_count: usize,
    /// Blocks returned to the pool
    pub deallocation_count: usize,
    /// Allocations refused for lack of memory
    pub failed_allocations: usize,
}

struct PoolInner {
    heap: Heap,
    stats: HeapStats,
}

/// Bounded allocator for pipe ring storage
pub struct BufferPool {
    inner: OrderedMutex<PoolInner>,
    arena: NonNull<u8>,
    arena_len: usize,
}

// SAFETY: the arena is only reached through the heap, which is protected by
// `inner`; blocks handed out are owned exclusively by their `PoolBlock`.
unsafe impl Send for BufferPool {}
// SAFETY: see above, all shared access goes through the mutex.
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Creates a pool over a freshly allocated arena of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`MIN_POOL_SIZE`].
    pub fn new(size: usize) -> Arc<Self> {
        assert!(size >= MIN_POOL_SIZE, "buffer pool arena too small");

        let arena: Box<[u8]> = vec![0u8; size].into_boxed_slice();
        let arena_ptr = Box::into_raw(arena) as *mut u8;
        // SAFETY: `Box::into_raw` never returns null
        let arena = unsafe { NonNull::new_unchecked(arena_ptr) };

        // SAFETY: the arena is `size` bytes, valid for writes, and owned by
        // this pool until `Drop` reclaims it after every block is gone
        // (blocks keep the pool alive through their `Arc`).
        let heap = unsafe { Heap::new(arena_ptr, size) };

        log::debug!("buffer pool: {} byte arena", size);

        Arc::new(Self {
            inner: OrderedMutex::new(
                LockId::Pool,
                PoolInner {
                    heap,
                    stats: HeapStats {
                        heap_capacity: size,
                        ..HeapStats::default()
                    },
                },
            ),
            arena,
            arena_len: size,
        })
    }

    /// Allocates a zeroed block of `size` bytes
    pub fn allocate(self: &Arc<Self>, size: usize) -> KernelResult<PoolBlock> {
        if size == 0 {
            return Err(KernelError::with_context(
                ErrorKind::InvalidArgument,
                "zero sized pool block",
            ));
        }
        let layout = Layout::from_size_align(size, 1).map_err(|_| {
            KernelError::with_context(ErrorKind::InvalidArgument, "pool block layout")
        })?;

        let mut inner = self.inner.lock();
        let ptr = match inner.heap.allocate_first_fit(layout) {
            Ok(ptr) => ptr,
            Err(()) => {
                inner.stats.failed_allocations += 1;
                log::debug!(
                    "buffer pool: cannot satisfy {} bytes ({} free)",
                    size,
                    inner.heap.free()
                );
                return Err(KernelError::with_context(
                    ErrorKind::OutOfMemory,
                    "pipe buffer pool exhausted",
                ));
            }
        };

        let stats = &mut inner.stats;
        stats.allocation_count += 1;
        stats.current_usage += size;
        stats.peak_usage = stats.peak_usage.max(stats.current_usage);
        drop(inner);

        // SAFETY: the heap returned `size` writable bytes at `ptr`
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };

        Ok(PoolBlock {
            ptr,
            layout,
            pool: Arc::clone(self),
        })
    }

    /// Current statistics
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats
    }

    /// Arena size in bytes
    pub fn capacity(&self) -> usize {
        self.arena_len
    }

    fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut inner = self.inner.lock();
        // SAFETY: `ptr` was returned by `allocate_first_fit` with `layout`
        // and its owning block is being dropped.
        unsafe { inner.heap.deallocate(ptr, layout) };
        inner.stats.deallocation_count += 1;
        inner.stats.current_usage = inner.stats.current_usage.saturating_sub(layout.size());
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let arena = ptr::slice_from_raw_parts_mut(self.arena.as_ptr(), self.arena_len);
        // SAFETY: created by `Box::into_raw` in `new` with the same length;
        // no block outlives the pool.
        drop(unsafe { Box::from_raw(arena) });
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("arena_len", &self.arena_len)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Block of pool memory, returned to the pool on drop
pub struct PoolBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    pool: Arc<BufferPool>,
}

// SAFETY: the block exclusively owns its bytes
unsafe impl Send for PoolBlock {}
// SAFETY: shared references only hand out `&[u8]`
unsafe impl Sync for PoolBlock {}

impl PoolBlock {
    /// Block size in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Blocks are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Block contents
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` initialized bytes for the life of the block
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// Block contents, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        self.pool.release(self.ptr, self.layout);
    }
}

impl fmt::Debug for PoolBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBlock").field("len", &self.len()).finish()
    }
}
