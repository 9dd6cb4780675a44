use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::trace;
use super::core_trait::{ensure_owned, DeviceHandle, DeviceMemory, DevicePtr};
use super::host::BlockStore;
use crate::error::Result;

enum StreamOp {
    Write { ptr: DevicePtr, bytes: Vec<u8> },
    Copy { dst: DevicePtr, src: DevicePtr, size: usize },
}

struct StreamState {
    store: BlockStore,
    pending: VecDeque<StreamOp>,
}

impl StreamState {
    fn drain(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some(op) = self.pending.pop_front() {
            match op {
                StreamOp::Write { ptr, bytes } => self.store.write(ptr, &bytes)?,
                StreamOp::Copy { dst, src, size } => self.store.copy(dst, src, size)?,
            }
            applied += 1;
        }
        Ok(applied)
    }
}

/// Accelerator memory with an in-order work queue.
///
/// Writes and copies are enqueued and only take effect when the stream is
/// drained, either explicitly through [`DeviceMemory::synchronize`] or
/// implicitly by any operation that reads results back. Bounds are validated
/// when work is issued so a bad copy fails at its call site.
pub struct StreamMemory {
    handle: DeviceHandle,
    state: Mutex<StreamState>,
}

impl StreamMemory {
    /// Memory for accelerator `device_id` with an empty stream.
    pub fn new(device_id: u32) -> Self {
        Self {
            handle: DeviceHandle::accelerator(device_id),
            state: Mutex::new(StreamState {
                store: BlockStore::default(),
                pending: VecDeque::new(),
            }),
        }
    }

    /// Number of operations issued but not yet applied
    pub fn pending(&self) -> Result<usize> {
        Ok(self.state.lock()?.pending.len())
    }
}

impl DeviceMemory for StreamMemory {
    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn allocate(&self, total_bytes: usize, _row_hint: usize) -> Result<DevicePtr> {
        self.state.lock()?.store.allocate(self.handle, total_bytes)
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        let mut state = self.state.lock()?;
        state.drain()?;
        state.store.free(ptr)
    }

    fn block_len(&self, ptr: DevicePtr) -> Result<usize> {
        ensure_owned(self.handle, ptr)?;
        self.state.lock()?.store.block_len(ptr)
    }

    fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        ensure_owned(self.handle, ptr)?;
        let mut state = self.state.lock()?;
        state.drain()?;
        state.store.read(ptr, len)
    }

    fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        ensure_owned(self.handle, ptr)?;
        let mut state = self.state.lock()?;
        state.store.check(ptr, bytes.len())?;
        state.pending.push_back(StreamOp::Write {
            ptr,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn copy_within(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> Result<()> {
        ensure_owned(self.handle, dst)?;
        ensure_owned(self.handle, src)?;
        let mut state = self.state.lock()?;
        state.store.check(src, size)?;
        state.store.check(dst, size)?;
        state.pending.push_back(StreamOp::Copy { dst, src, size });
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        let applied = self.state.lock()?.drain()?;
        trace!(target: "teppan.device", device = %self.handle, applied, "stream drained");
        Ok(())
    }
}
