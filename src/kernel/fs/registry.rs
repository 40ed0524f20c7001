//! Device registry
//!
//! Path-keyed table of device nodes. Drivers register an operation table
//! under an absolute path; opening the path dispatches to it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::kernel::core::{ErrorKind, KernelError, KernelResult, OpenFlags};
use crate::kernel::fs::{File, FileOperations};
use crate::sync::{LockId, OrderedMutex};

struct Node {
    ops: Arc<dyn FileOperations>,
    mode: u32,
}

/// Registry of device nodes
pub struct DeviceRegistry {
    nodes: OrderedMutex<BTreeMap<String, Node>>,
    capacity: usize,
}

impl DeviceRegistry {
    /// Creates an empty registry holding at most `capacity` nodes
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: OrderedMutex::new(LockId::Registry, BTreeMap::new()),
            capacity,
        }
    }

    /// Registers `ops` under `path` with permission bits `mode`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a relative path, `RegistrationFailed` when the
    /// path is taken or the registry is full.
    pub fn register_driver(
        &self,
        path: &str,
        mode: u32,
        ops: Arc<dyn FileOperations>,
    ) -> KernelResult<()> {
        if !path.starts_with('/') {
            return Err(KernelError::with_context(
                ErrorKind::InvalidArgument,
                "device path must be absolute",
            ));
        }

        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) {
            return Err(KernelError::with_context(
                ErrorKind::RegistrationFailed,
                "path already registered",
            ));
        }
        if nodes.len() >= self.capacity {
            return Err(KernelError::with_context(
                ErrorKind::RegistrationFailed,
                "device registry full",
            ));
        }

        nodes.insert(path.to_owned(), Node { ops, mode });
        log::debug!("registry: {} registered (mode {:o})", path, mode);
        Ok(())
    }

    /// Removes the node at `path`
    pub fn unregister_driver(&self, path: &str) -> KernelResult<()> {
        match self.nodes.lock().remove(path) {
            Some(_) => {
                log::debug!("registry: {} unregistered", path);
                Ok(())
            }
            None => Err(KernelError::new(ErrorKind::NotFound)),
        }
    }

    /// Removes the node at `path` only if it still refers to `ops`.
    ///
    /// A device retiring itself must not remove a successor registered
    /// under the same path.
    pub(crate) fn unregister_if_same(&self, path: &str, ops: &dyn FileOperations) -> bool {
        let mut nodes = self.nodes.lock();
        let same = nodes.get(path).is_some_and(|node| {
            std::ptr::addr_eq(Arc::as_ptr(&node.ops), ops as *const dyn FileOperations)
        });
        if same {
            nodes.remove(path);
            log::debug!("registry: {} unregistered", path);
        }
        same
    }

    /// Device behind `path`
    pub fn lookup(&self, path: &str) -> Option<Arc<dyn FileOperations>> {
        self.nodes.lock().get(path).map(|node| Arc::clone(&node.ops))
    }

    /// Permission bits `path` was registered with
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.nodes.lock().get(path).map(|node| node.mode)
    }

    /// A node is registered at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(path)
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// No node is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered paths, in order
    pub fn paths(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    /// Opens the device at `path`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `flags` asks for neither reading nor writing,
    /// `NotFound` when nothing is registered at `path`, or whatever the
    /// device's `open` returns.
    pub fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<File> {
        if !flags.intersects(OpenFlags::RDWR) {
            return Err(KernelError::with_context(
                ErrorKind::InvalidArgument,
                "open without access mode",
            ));
        }

        // The device may block in open, so the registry lock is not held
        let ops = self
            .lookup(path)
            .ok_or(KernelError::with_context(ErrorKind::NotFound, "no device at path"))?;
        ops.open(flags)?;
        Ok(File::new(path.to_owned(), flags, ops))
    }

    /// Removes `path` and tells the device about it.
    ///
    /// Open handles keep working; the device decides when to go away.
    pub fn unlink(&self, path: &str) -> KernelResult<()> {
        let node = self
            .nodes
            .lock()
            .remove(path)
            .ok_or(KernelError::with_context(ErrorKind::NotFound, "no device at path"))?;
        log::debug!("registry: {} unlinked", path);
        node.ops.unlink()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_REGISTRY_CAPACITY)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("paths", &self.paths())
            .field("capacity", &self.capacity)
            .finish()
    }
}
