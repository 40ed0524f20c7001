//! Named pipes
//!
//! [`PipeDriver::pipe`] hands out a connected reader/writer pair backed by a
//! device registered at `/dev/pipeN`, where `N` is the lowest free slot.
//! Other tasks can open the same path to join either end.
//!
//! # Example
//!
//! ```
//! use tiny_pipes::{PipeConfig, PipeDriver};
//!
//! let driver = PipeDriver::new(PipeConfig::default()).unwrap();
//! let (reader, writer) = driver.pipe().unwrap();
//! assert_eq!(reader.path(), "/dev/pipe0");
//!
//! writer.write(b"hello").unwrap();
//! drop(writer);
//!
//! let mut buf = [0u8; 16];
//! assert_eq!(reader.read(&mut buf).unwrap(), 5);
//! assert_eq!(reader.read(&mut buf).unwrap(), 0);
//! ```

mod device;
mod ring;
mod slots;

use std::sync::Arc;

use spin::Lazy;

pub use device::PipeDevice;
pub use slots::PipeSlotTable;

use crate::config::PipeConfig;
use crate::constants::pipe_path;
use crate::kernel::core::{ErrorKind, KernelResult, OpenFlags};
use crate::kernel::fs::{DeviceRegistry, File, FileOperations};
use crate::kernel::mm::BufferPool;

/// Permission bits of `/dev/pipeN` nodes
const PIPE_MODE: u32 = 0o666;

/// Pipe driver: slot table, buffer pool and the registry devices live in
#[derive(Debug)]
pub struct PipeDriver {
    config: PipeConfig,
    slots: Arc<PipeSlotTable>,
    registry: Arc<DeviceRegistry>,
    pool: Arc<BufferPool>,
}

/// Driver behind [`pipe`]
pub static PIPES: Lazy<PipeDriver> = Lazy::new(PipeDriver::default);

/// Creates a pipe on the global driver
pub fn pipe() -> KernelResult<(File, File)> {
    PIPES.pipe()
}

impl PipeDriver {
    /// Creates a driver with its own registry
    pub fn new(config: PipeConfig) -> KernelResult<Self> {
        config.validate()?;
        let registry = Arc::new(DeviceRegistry::new(config.registry_capacity));
        Ok(Self::build(config, registry))
    }

    /// Creates a driver registering its devices in `registry`
    pub fn with_registry(config: PipeConfig, registry: Arc<DeviceRegistry>) -> KernelResult<Self> {
        config.validate()?;
        Ok(Self::build(config, registry))
    }

    fn build(config: PipeConfig, registry: Arc<DeviceRegistry>) -> Self {
        log::info!(
            "pipe driver: {} slots, {} byte buffers, {} byte pool",
            config.max_pipes,
            config.pipe_size,
            config.pool_size
        );
        Self {
            slots: Arc::new(PipeSlotTable::new(config.max_pipes)),
            pool: BufferPool::new(config.pool_size),
            registry,
            config,
        }
    }

    /// Creates a pipe, returning `(reader, writer)`.
    ///
    /// # Errors
    ///
    /// - `TooManyOpenFiles` when every slot is in use
    /// - `OutOfMemory` when the buffer pool is exhausted
    /// - `RegistrationFailed` when `/dev/pipeN` cannot be registered
    /// - `Interrupted` when the calling task has a cancellation pending
    ///
    /// A failed call leaves no slot occupied and no node registered.
    pub fn pipe(&self) -> KernelResult<(File, File)> {
        let mut slots = self.slots.lock_interruptible()?;
        let slot = slots.allocate()?;
        let path = pipe_path(slot.index());

        let device = loop {
            if let Some(device) = slots.created_device(slot) {
                // Taking the device lock under the slot lock would invert
                // the lock order
                drop(slots);
                match device.claim() {
                    Ok(()) => break device,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        // retired while we looked; it has unbound itself
                        slots = self.slots.lock();
                        continue;
                    }
                    Err(err) => {
                        self.slots.free(slot);
                        log::debug!("{}: cannot reuse device: {}", path, err);
                        return Err(err);
                    }
                }
            }

            let device = match PipeDevice::new(
                slot,
                path.clone(),
                self.config.pipe_size,
                self.config.policy,
                &self.pool,
                &self.slots,
                &self.registry,
            ) {
                Ok(device) => device,
                Err(err) => {
                    slots.free(slot);
                    log::debug!("{}: cannot create device: {}", path, err);
                    return Err(err);
                }
            };

            let ops: Arc<dyn FileOperations> = device.clone();
            if let Err(err) = self.registry.register_driver(&path, PIPE_MODE, ops) {
                slots.free(slot);
                log::debug!("{}: cannot register device: {}", path, err);
                return Err(err);
            }

            slots.mark_created(slot, &device);
            drop(slots);
            break device;
        };

        // Both ends are already attached to the device
        let writer = File::new(path.clone(), OpenFlags::WRONLY, device.clone());
        let reader = File::new(path, OpenFlags::RDONLY, device);

        log::debug!("{}: pipe created", reader.path());
        Ok((reader, writer))
    }

    /// Opens a registered path (typically `/dev/pipeN`)
    pub fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<File> {
        self.registry.open(path, flags)
    }

    /// Removes a path from the registry
    pub fn unlink(&self, path: &str) -> KernelResult<()> {
        self.registry.unlink(path)
    }

    /// Configuration the driver was built with
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Slot table
    pub fn slots(&self) -> &PipeSlotTable {
        &self.slots
    }

    /// Device registry
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

impl Default for PipeDriver {
    fn default() -> Self {
        let config = PipeConfig::default();
        let registry = Arc::new(DeviceRegistry::new(config.registry_capacity));
        Self::build(config, registry)
    }
}
