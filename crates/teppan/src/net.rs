//! A reference [`InferenceEngine`] built from named blobs in device memory.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tracing::trace;
use crate::device::{DeviceHandle, DeviceMemory, DevicePtr};
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};
use crate::tensor::{bytes_to_f32, f32_to_bytes, HostTensor, TensorShape};

/// The computation a [`BlobNet`] runs on each forward pass.
///
/// Inputs arrive keyed by blob name with their current shapes. The model
/// must return a tensor for every output blob; output shapes are free to
/// change between passes.
pub trait NetModel: Send + Sync {
    fn forward(&self, inputs: &HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>>;
}

impl<F> NetModel for F
where
    F: Fn(&HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>> + Send + Sync,
{
    fn forward(&self, inputs: &HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>> {
        self(inputs)
    }
}

#[derive(Debug)]
struct Blob {
    shape: TensorShape,
    ptr: DevicePtr,
    capacity: usize,
}

/// Named, shaped blobs resident on one device, driven by a [`NetModel`].
///
/// Reshaping reallocates a blob only when its byte size grows beyond the
/// current allocation, so shrinking for a short final batch and growing back
/// keeps the same backing pointer.
pub struct BlobNet<M> {
    memory: Arc<dyn DeviceMemory>,
    model: M,
    inputs: Vec<String>,
    outputs: Vec<String>,
    blobs: HashMap<String, Blob>,
    reshapes: usize,
    forwards: usize,
}

impl<M: NetModel> BlobNet<M> {
    /// Allocate every input and output blob with its initial shape.
    pub fn new<S: Into<String>>(
        memory: Arc<dyn DeviceMemory>,
        model: M,
        inputs: impl IntoIterator<Item = (S, TensorShape)>,
        outputs: impl IntoIterator<Item = (S, TensorShape)>,
    ) -> Result<Self> {
        let mut net = Self {
            memory,
            model,
            inputs: vec![],
            outputs: vec![],
            blobs: HashMap::new(),
            reshapes: 0,
            forwards: 0,
        };
        for (name, shape) in inputs {
            let name = name.into();
            net.add_blob(&name, shape)?;
            net.inputs.push(name);
        }
        for (name, shape) in outputs {
            let name = name.into();
            net.add_blob(&name, shape)?;
            net.outputs.push(name);
        }
        Ok(net)
    }

    fn add_blob(&mut self, name: &str, shape: TensorShape) -> Result<()> {
        let capacity = shape.byte_len();
        let ptr = self.memory.allocate(capacity, 1)?;
        self.blobs.insert(name.to_string(), Blob { shape, ptr, capacity });
        Ok(())
    }

    fn blob(&self, name: &str) -> Result<&Blob> {
        self.blobs
            .get(name)
            .ok_or_else(|| KernelError::UnknownBuffer(name.to_string()))
    }

    /// Device the blobs reside on
    pub fn device(&self) -> DeviceHandle {
        self.memory.handle()
    }

    /// Number of reshape calls received
    pub fn reshape_count(&self) -> usize {
        self.reshapes
    }

    /// Number of forward passes run
    pub fn forward_count(&self) -> usize {
        self.forwards
    }

    /// Read a blob back to the host.
    pub fn read_blob(&self, name: &str) -> Result<HostTensor> {
        let blob = self.blob(name)?;
        let bytes = self.memory.read(blob.ptr, blob.shape.byte_len())?;
        Ok(HostTensor::new(blob.shape.clone(), bytes_to_f32(&bytes)))
    }

    fn resize(&mut self, name: &str, shape: TensorShape) -> Result<()> {
        let memory = self.memory.clone();
        let blob = self
            .blobs
            .get_mut(name)
            .ok_or_else(|| KernelError::UnknownBuffer(name.to_string()))?;
        let needed = shape.byte_len();
        if needed > blob.capacity {
            memory.free(blob.ptr)?;
            blob.ptr = memory.allocate(needed, 1)?;
            blob.capacity = needed;
        }
        blob.shape = shape;
        Ok(())
    }
}

#[async_trait]
impl<M: NetModel> InferenceEngine for BlobNet<M> {
    fn buffer_shape(&self, name: &str) -> Result<TensorShape> {
        Ok(self.blob(name)?.shape.clone())
    }

    fn reshape_buffer(&mut self, name: &str, shape: TensorShape) -> Result<()> {
        self.reshapes += 1;
        trace!(target: "teppan.net", name, %shape, "reshape blob");
        self.resize(name, shape)
    }

    fn buffer_pointer(&self, name: &str, device: DeviceHandle) -> Result<DevicePtr> {
        let blob = self.blob(name)?;
        if device != self.memory.handle() {
            return Err(KernelError::ResidencyMismatch {
                resident: self.memory.handle(),
                requested: device,
            });
        }
        Ok(blob.ptr)
    }

    async fn forward(&mut self) -> Result<()> {
        let mut inputs = HashMap::with_capacity(self.inputs.len());
        for name in &self.inputs {
            inputs.insert(name.clone(), self.read_blob(name)?);
        }

        let mut produced = self.model.forward(&inputs)?;
        for name in self.outputs.clone() {
            let tensor = produced
                .remove(&name)
                .ok_or_else(|| KernelError::Engine(format!("model produced no output '{name}'")))?;
            if tensor.data.len() != tensor.shape.count() {
                return Err(KernelError::Engine(format!(
                    "output '{name}' has {} values for shape {}",
                    tensor.data.len(),
                    tensor.shape
                )));
            }
            self.resize(&name, tensor.shape.clone())?;
            let ptr = self.blob(&name)?.ptr;
            self.memory.write(ptr, &f32_to_bytes(&tensor.data))?;
        }
        self.forwards += 1;
        Ok(())
    }
}
