// src/config.rs

//! Driver configuration
//!
//! Driver limits are collected in a [`PipeConfig`] that is validated once
//! and then frozen inside a [`PipeDriver`](crate::PipeDriver).

use crate::constants::{
    DEFAULT_POOL_SIZE, DEFAULT_REGISTRY_CAPACITY, DEV_PIPE_SIZE, MAX_PIPES, MIN_POOL_SIZE,
};
use crate::kernel::core::{ErrorKind, KernelError, KernelResult};

/// What happens to a pipe device once its last handle is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Release the buffer, remove the `/dev/pipeN` registration and forget
    /// the device, then free the slot
    #[default]
    OnLastClose,
    /// Release the buffer and free the slot, but keep the device registered
    /// so the next `pipe()` on that slot reuses it; only `unlink` retires it
    Persistent,
}

/// Pipe driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Ring buffer capacity of every pipe, in bytes
    pub pipe_size: usize,
    /// Number of slots (minor numbers), at most [`MAX_PIPES`]
    pub max_pipes: usize,
    /// Size of the buffer pool arena, in bytes
    pub pool_size: usize,
    /// Number of nodes the device registry accepts
    pub registry_capacity: usize,
    /// Default teardown policy of new devices
    pub policy: TeardownPolicy,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            pipe_size: DEV_PIPE_SIZE,
            max_pipes: MAX_PIPES,
            pool_size: DEFAULT_POOL_SIZE,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            policy: TeardownPolicy::default(),
        }
    }
}

impl PipeConfig {
    /// Sets the ring buffer capacity
    pub fn with_pipe_size(mut self, pipe_size: usize) -> Self {
        self.pipe_size = pipe_size;
        self
    }

    /// Sets the number of slots
    pub fn with_max_pipes(mut self, max_pipes: usize) -> Self {
        self.max_pipes = max_pipes;
        self
    }

    /// Sets the buffer pool arena size
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the registry capacity
    pub fn with_registry_capacity(mut self, registry_capacity: usize) -> Self {
        self.registry_capacity = registry_capacity;
        self
    }

    /// Sets the default teardown policy
    pub fn with_policy(mut self, policy: TeardownPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checks the configuration for consistency
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::InvalidArgument` with a context naming the
    /// offending field.
    pub fn validate(&self) -> KernelResult<()> {
        let invalid = |ctx| Err(KernelError::with_context(ErrorKind::InvalidArgument, ctx));

        if self.pipe_size == 0 {
            return invalid("pipe_size must be nonzero");
        }
        if self.max_pipes == 0 || self.max_pipes > MAX_PIPES {
            return invalid("max_pipes must be within 1..=32");
        }
        if self.pool_size < MIN_POOL_SIZE || self.pool_size < self.pipe_size {
            return invalid("pool_size cannot hold a single pipe buffer");
        }
        if self.registry_capacity == 0 {
            return invalid("registry_capacity must be nonzero");
        }
        Ok(())
    }
}
