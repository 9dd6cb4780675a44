use std::collections::HashMap;
use std::sync::Mutex;
use candle_core::{DType, Device, Tensor};
use uuid::Uuid;
use super::core_trait::{ensure_owned, DeviceHandle, DeviceKind, DeviceMemory, DevicePtr};
use crate::error::{KernelError, Result};

/// Device memory backed by flat `u8` candle tensors.
///
/// Blocks live on the candle [`Device`] matching the handle: the CPU for
/// host handles, the CUDA device of the same ordinal for accelerators.
pub struct CandleMemory {
    handle: DeviceHandle,
    device: Device,
    blocks: Mutex<HashMap<Uuid, Tensor>>,
}

impl CandleMemory {
    /// Bind to the candle device matching `handle`.
    ///
    /// Accelerator handles fail with [`KernelError::DeviceUnavailable`] when
    /// candle falls back to the CPU.
    pub fn new(handle: DeviceHandle) -> Result<Self> {
        let device = match handle.kind {
            DeviceKind::Host => Device::Cpu,
            DeviceKind::Accelerator => {
                let device = Device::cuda_if_available(handle.id as usize)?;
                if device.is_cpu() {
                    return Err(KernelError::DeviceUnavailable(handle));
                }
                device
            }
        };
        Ok(Self {
            handle,
            device,
            blocks: Mutex::new(HashMap::new()),
        })
    }

    /// The candle device every block is created on
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn checked(blocks: &HashMap<Uuid, Tensor>, ptr: DevicePtr, len: usize) -> Result<Tensor> {
        let block = blocks
            .get(&ptr.block)
            .ok_or(KernelError::InvalidPointer(ptr.device))?;
        let block_len = block.dims1()?;
        if ptr.offset + len > block_len {
            return Err(KernelError::OutOfBounds {
                offset: ptr.offset,
                len,
                block_len,
            });
        }
        Ok(block.clone())
    }
}

impl DeviceMemory for CandleMemory {
    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn allocate(&self, total_bytes: usize, _row_hint: usize) -> Result<DevicePtr> {
        let tensor = Tensor::zeros(total_bytes, DType::U8, &self.device)?;
        let block = Uuid::new_v4();
        self.blocks.lock()?.insert(block, tensor);
        Ok(DevicePtr::new(self.handle, block))
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        self.blocks
            .lock()?
            .remove(&ptr.block)
            .map(|_| ())
            .ok_or(KernelError::InvalidPointer(self.handle))
    }

    fn block_len(&self, ptr: DevicePtr) -> Result<usize> {
        ensure_owned(self.handle, ptr)?;
        let blocks = self.blocks.lock()?;
        let block = blocks
            .get(&ptr.block)
            .ok_or(KernelError::InvalidPointer(self.handle))?;
        Ok(block.dims1()?)
    }

    fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        ensure_owned(self.handle, ptr)?;
        let block = Self::checked(&*self.blocks.lock()?, ptr, len)?;
        Ok(block.narrow(0, ptr.offset, len)?.to_vec1::<u8>()?)
    }

    fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        let mut blocks = self.blocks.lock()?;
        let block = Self::checked(&blocks, ptr, bytes.len())?;
        let src = Tensor::from_slice(bytes, bytes.len(), &self.device)?;
        let updated = block.slice_assign(&[ptr.offset..ptr.offset + bytes.len()], &src)?;
        blocks.insert(ptr.block, updated);
        Ok(())
    }

    fn copy_within(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()> {
        ensure_owned(self.handle, dst)?;
        ensure_owned(self.handle, src)?;
        let mut blocks = self.blocks.lock()?;
        let source = Self::checked(&blocks, src, size)?.narrow(0, src.offset, size)?;
        let target = Self::checked(&blocks, dst, size)?;
        let updated = target.slice_assign(&[dst.offset..dst.offset + size], &source)?;
        blocks.insert(dst.block, updated);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(self.device.synchronize()?)
    }
}
