use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;
use super::core_trait::{ensure_owned, DeviceHandle, DeviceMemory, DevicePtr};
use crate::error::{KernelError, Result};

/// Byte blocks keyed by id, with bounds-checked access.
///
/// Shared by the host and stream memories, which differ only in when
/// operations take effect.
#[derive(Debug, Default)]
pub(crate) struct BlockStore {
    blocks: HashMap<Uuid, Vec<u8>>,
}

impl BlockStore {
    pub(crate) fn allocate(&mut self, device: DeviceHandle, total_bytes: usize) -> Result<DevicePtr> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total_bytes)
            .map_err(|_| KernelError::AllocationFailed {
                device,
                bytes: total_bytes,
            })?;
        bytes.resize(total_bytes, 0);
        let block = Uuid::new_v4();
        self.blocks.insert(block, bytes);
        Ok(DevicePtr::new(device, block))
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        self.blocks
            .remove(&ptr.block)
            .map(|_| ())
            .ok_or(KernelError::InvalidPointer(ptr.device))
    }

    pub(crate) fn block_len(&self, ptr: DevicePtr) -> Result<usize> {
        self.blocks
            .get(&ptr.block)
            .map(Vec::len)
            .ok_or(KernelError::InvalidPointer(ptr.device))
    }

    /// Fails unless `[ptr.offset, ptr.offset + len)` lies inside the block.
    pub(crate) fn check(&self, ptr: DevicePtr, len: usize) -> Result<()> {
        let block_len = self.block_len(ptr)?;
        if ptr.offset.checked_add(len).is_none_or(|end| end > block_len) {
            return Err(KernelError::OutOfBounds {
                offset: ptr.offset,
                len,
                block_len,
            });
        }
        Ok(())
    }

    pub(crate) fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        self.check(ptr, len)?;
        let block = &self.blocks[&ptr.block];
        Ok(block[ptr.offset..ptr.offset + len].to_vec())
    }

    pub(crate) fn write(&mut self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        self.check(ptr, bytes.len())?;
        let block = self
            .blocks
            .get_mut(&ptr.block)
            .ok_or(KernelError::InvalidPointer(ptr.device))?;
        block[ptr.offset..ptr.offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn copy(&mut self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()> {
        self.check(src, size)?;
        self.check(dst, size)?;
        if dst.block == src.block {
            let block = self
                .blocks
                .get_mut(&dst.block)
                .ok_or(KernelError::InvalidPointer(dst.device))?;
            block.copy_within(src.offset..src.offset + size, dst.offset);
            return Ok(());
        }
        let bytes = self.read(src, size)?;
        self.write(dst, &bytes)
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// Host-resident memory. Every operation completes before it returns.
#[derive(Debug)]
pub struct HostMemory {
    handle: DeviceHandle,
    store: Mutex<BlockStore>,
}

impl HostMemory {
    /// Empty host memory, registered under [`DeviceHandle::HOST`].
    pub fn new() -> Self {
        Self {
            handle: DeviceHandle::host(),
            store: Mutex::new(BlockStore::default()),
        }
    }

    /// Number of live blocks
    pub fn live_blocks(&self) -> Result<usize> {
        Ok(self.store.lock()?.len())
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for HostMemory {
    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn allocate(&self, total_bytes: usize, _row_hint: usize) -> Result<DevicePtr> {
        self.store.lock()?.allocate(self.handle, total_bytes)
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        self.store.lock()?.free(ptr)
    }

    fn block_len(&self, ptr: DevicePtr) -> Result<usize> {
        ensure_owned(self.handle, ptr)?;
        self.store.lock()?.block_len(ptr)
    }

    fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        ensure_owned(self.handle, ptr)?;
        self.store.lock()?.read(ptr, len)
    }

    fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        self.store.lock()?.write(ptr, bytes)
    }

    fn copy_within(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()> {
        ensure_owned(self.handle, dst)?;
        ensure_owned(self.handle, src)?;
        self.store.lock()?.copy(dst, src, size)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let memory = HostMemory::new();
        let ptr = memory.allocate(8, 1).unwrap();
        memory.write(ptr.add(2), &[1, 2, 3]).unwrap();
        assert_eq!(memory.read(ptr, 8).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_copy_between_blocks() {
        let memory = HostMemory::new();
        let a = memory.allocate(4, 1).unwrap();
        let b = memory.allocate(4, 1).unwrap();
        memory.write(a, &[9, 8, 7, 6]).unwrap();
        memory.copy_within(b.add(1), a.add(1), 3).unwrap();
        assert_eq!(memory.read(b, 4).unwrap(), vec![0, 8, 7, 6]);
    }

    #[test]
    fn test_overlapping_copy_within_one_block() {
        let memory = HostMemory::new();
        let a = memory.allocate(6, 1).unwrap();
        memory.write(a, &[1, 2, 3, 4, 5, 6]).unwrap();
        memory.copy_within(a.add(2), a, 4).unwrap();
        assert_eq!(memory.read(a, 6).unwrap(), vec![1, 2, 1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds_is_rejected() {
        let memory = HostMemory::new();
        let ptr = memory.allocate(4, 1).unwrap();
        let err = memory.write(ptr.add(2), &[0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            KernelError::OutOfBounds { offset: 2, len: 3, block_len: 4 }
        ));
    }

    #[test]
    fn test_free_invalidates_pointer() {
        let memory = HostMemory::new();
        let ptr = memory.allocate(4, 1).unwrap();
        assert_eq!(memory.live_blocks().unwrap(), 1);
        memory.free(ptr).unwrap();
        assert_eq!(memory.live_blocks().unwrap(), 0);
        assert!(matches!(memory.read(ptr, 1), Err(KernelError::InvalidPointer(_))));
    }
}
