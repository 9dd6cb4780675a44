use std::fmt::{self, Display};
use serde::Deserialize;
use uuid::Uuid;
use crate::error::{KernelError, Result};

/// The memory space a device exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host (CPU) memory
    Host,
    /// Accelerator memory, addressed by device index
    Accelerator,
}

/// Identifies the device every allocation and copy is tagged with.
///
/// The handle is passed by value through every operation rather than held as
/// ambient "current device" state, so no context needs re-asserting between
/// calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct DeviceHandle {
    pub kind: DeviceKind,
    #[serde(default)]
    pub id: u32,
}

impl DeviceHandle {
    /// The single host device
    pub const HOST: DeviceHandle = DeviceHandle {
        kind: DeviceKind::Host,
        id: 0,
    };

    pub fn host() -> Self {
        Self::HOST
    }

    /// Accelerator number `id`
    pub fn accelerator(id: u32) -> Self {
        Self {
            kind: DeviceKind::Accelerator,
            id,
        }
    }

    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }
}

impl Default for DeviceHandle {
    fn default() -> Self {
        Self::HOST
    }
}

impl Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Host => write!(f, "host"),
            DeviceKind::Accelerator => write!(f, "accelerator:{}", self.id),
        }
    }
}

/// A position inside a block allocated by some [`DeviceMemory`].
///
/// Pointers are plain values: copying one never copies the memory it
/// references, and they stay valid until the owning block is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevicePtr {
    pub device: DeviceHandle,
    pub block: Uuid,
    pub offset: usize,
}

impl DevicePtr {
    /// Pointer to the start of `block`
    pub fn new(device: DeviceHandle, block: Uuid) -> Self {
        Self {
            device,
            block,
            offset: 0,
        }
    }

    /// Returns a pointer `bytes` further into the same block.
    pub fn add(self, bytes: usize) -> Self {
        Self {
            offset: self.offset + bytes,
            ..self
        }
    }
}

/// The capability every memory space must provide.
///
/// One implementation is selected per [`DeviceHandle`]; callers never branch
/// on the device kind themselves.
pub trait DeviceMemory: Send + Sync {
    /// The device this memory belongs to
    fn handle(&self) -> DeviceHandle;

    /// Allocate one contiguous block of `total_bytes`.
    ///
    /// `row_hint` is the number of rows that will be carved out of the block;
    /// implementations may use it for bookkeeping.
    fn allocate(&self, total_bytes: usize, row_hint: usize) -> Result<DevicePtr>;

    /// Release the block `ptr` points into
    fn free(&self, ptr: DevicePtr) -> Result<()>;

    /// Total length of the block `ptr` points into
    fn block_len(&self, ptr: DevicePtr) -> Result<usize>;

    /// Read `len` bytes back to the host, draining pending work first
    fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>>;

    /// Write host bytes into device memory
    fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()>;

    /// Copy `size` bytes between two pointers on this device
    fn copy_within(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()>;

    /// Block until all previously issued work on this device has completed
    fn synchronize(&self) -> Result<()>;
}

/// Rejects pointers that belong to another device.
pub(crate) fn ensure_owned(handle: DeviceHandle, ptr: DevicePtr) -> Result<()> {
    if ptr.device != handle {
        return Err(KernelError::InvalidPointer(handle));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(DeviceHandle::host().to_string(), "host");
        assert_eq!(DeviceHandle::accelerator(3).to_string(), "accelerator:3");
    }

    #[test]
    fn test_ptr_add_keeps_block() {
        let block = Uuid::new_v4();
        let ptr = DevicePtr::new(DeviceHandle::host(), block).add(16).add(4);
        assert_eq!(ptr.offset, 20);
        assert_eq!(ptr.block, block);
    }

    #[test]
    fn test_ensure_owned_rejects_foreign_pointer() {
        let ptr = DevicePtr::new(DeviceHandle::accelerator(0), Uuid::new_v4());
        assert!(ensure_owned(DeviceHandle::accelerator(0), ptr).is_ok());
        assert!(matches!(
            ensure_owned(DeviceHandle::accelerator(1), ptr),
            Err(KernelError::InvalidPointer(_))
        ));
    }
}
