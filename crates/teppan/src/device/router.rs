use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use super::core_trait::{DeviceHandle, DeviceMemory, DevicePtr};
use crate::error::{KernelError, Result};

/// Routes allocations and copies to the memory owning each pointer.
///
/// Copies between pointers on the same device stay on that device. Copies
/// across devices are staged through the host, which drains the source
/// device first.
#[derive(Clone, Default)]
pub struct MemoryRouter {
    devices: HashMap<DeviceHandle, Arc<dyn DeviceMemory>>,
}

impl MemoryRouter {
    /// A router with no devices registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, memory: Arc<dyn DeviceMemory>) -> Self {
        self.register(memory);
        self
    }

    /// Register a memory under its own handle, replacing any previous one.
    pub fn register(&mut self, memory: Arc<dyn DeviceMemory>) {
        self.devices.insert(memory.handle(), memory);
    }

    /// The memory registered for `device`.
    ///
    /// Fails with [`KernelError::DeviceUnavailable`] when there is none.
    pub fn memory(&self, device: DeviceHandle) -> Result<&Arc<dyn DeviceMemory>> {
        self.devices
            .get(&device)
            .ok_or(KernelError::DeviceUnavailable(device))
    }

    /// Allocate a block on `device`. See [`DeviceMemory::allocate`].
    pub fn allocate(&self, device: DeviceHandle, total_bytes: usize, row_hint: usize) -> Result<DevicePtr> {
        self.memory(device)?.allocate(total_bytes, row_hint)
    }

    /// Read `len` bytes at `ptr` back to the host
    pub fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        self.memory(ptr.device)?.read(ptr, len)
    }

    /// Write host bytes at `ptr`
    pub fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        self.memory(ptr.device)?.write(ptr, bytes)
    }

    /// Block until all work queued on `device` has completed
    pub fn synchronize(&self, device: DeviceHandle) -> Result<()> {
        self.memory(device)?.synchronize()
    }

    /// Copy `size` bytes from `src` to `dst`, wherever each resides.
    pub fn copy(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if dst.device == src.device {
            return self.memory(dst.device)?.copy_within(dst, src, size);
        }
        debug!(
            target: "teppan.device",
            from = %src.device,
            to = %dst.device,
            size,
            "cross-device transfer"
        );
        let staged = self.memory(src.device)?.read(src, size)?;
        self.memory(dst.device)?.write(dst, &staged)
    }

    /// Copy a list of regions in one call. The three lists run in parallel.
    pub fn copy_batch(&self, dsts: &[DevicePtr], srcs: &[DevicePtr], sizes: &[usize]) -> Result<()> {
        if dsts.len() != srcs.len() || srcs.len() != sizes.len() {
            return Err(KernelError::CopyListMismatch {
                dsts: dsts.len(),
                srcs: srcs.len(),
                sizes: sizes.len(),
            });
        }
        for ((dst, src), size) in dsts.iter().zip(srcs).zip(sizes) {
            self.copy(*dst, *src, *size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HostMemory, StreamMemory};

    fn router() -> MemoryRouter {
        MemoryRouter::new()
            .with(Arc::new(HostMemory::new()))
            .with(Arc::new(StreamMemory::new(0)))
    }

    #[test]
    fn test_unknown_device_is_unavailable() {
        let router = router();
        let err = router.allocate(DeviceHandle::accelerator(5), 4, 1).unwrap_err();
        assert!(matches!(err, KernelError::DeviceUnavailable(d) if d == DeviceHandle::accelerator(5)));
    }

    #[test]
    fn test_host_to_accelerator_and_back() {
        let router = router();
        let host = router.allocate(DeviceHandle::host(), 4, 1).unwrap();
        let accel = router.allocate(DeviceHandle::accelerator(0), 4, 1).unwrap();
        router.write(host, &[1, 2, 3, 4]).unwrap();

        router.copy(accel, host, 4).unwrap();
        let back = router.allocate(DeviceHandle::host(), 4, 1).unwrap();
        router.copy(back, accel, 4).unwrap();

        assert_eq!(router.read(back, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_batch_requires_parallel_lists() {
        let router = router();
        let ptr = router.allocate(DeviceHandle::host(), 4, 1).unwrap();
        let err = router.copy_batch(&[ptr], &[ptr, ptr], &[1]).unwrap_err();
        assert!(matches!(err, KernelError::CopyListMismatch { dsts: 1, srcs: 2, sizes: 1 }));
    }

    #[test]
    fn test_copy_batch_moves_every_region() {
        let router = router();
        let src = router.allocate(DeviceHandle::host(), 6, 2).unwrap();
        let dst = router.allocate(DeviceHandle::host(), 6, 2).unwrap();
        router.write(src, &[1, 2, 3, 4, 5, 6]).unwrap();
        router
            .copy_batch(&[dst, dst.add(4)], &[src.add(4), src], &[2, 2])
            .unwrap();
        assert_eq!(router.read(dst, 6).unwrap(), vec![5, 6, 0, 0, 1, 2]);
    }
}
