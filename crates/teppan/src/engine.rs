use async_trait::async_trait;
use crate::device::{DeviceHandle, DevicePtr};
use crate::error::Result;
use crate::tensor::TensorShape;

/// The inference engine the kernel drives.
///
/// The engine owns its named buffers; the kernel only reshapes them, copies
/// into and out of them through the pointers handed out here, and triggers
/// forward passes. Its numerics are opaque.
///
/// # Implementation Notes
///
/// Implementations should:
/// * Keep the backing pointer of a buffer stable across reshapes that do not
///   grow it
/// * Refuse [`buffer_pointer`](Self::buffer_pointer) for a device the buffer
///   does not reside on, rather than hand out a pointer into the wrong
///   memory space
/// * Leave every output buffer shaped with the current batch as its first
///   dimension once [`forward`](Self::forward) returns
///
/// # Example
///
/// ```ignore
/// use teppan::engine::InferenceEngine;
///
/// async fn run<E: InferenceEngine>(engine: &mut E) -> teppan::Result<()> {
///     let shape = engine.buffer_shape("data")?;
///     engine.reshape_buffer("data", shape.with_batch(2))?;
///     engine.forward().await
/// }
/// ```
#[async_trait]
pub trait InferenceEngine: Send {
    /// Current shape of the named buffer
    fn buffer_shape(&self, name: &str) -> Result<TensorShape>;

    /// Change the shape of the named buffer, reallocating if it must grow.
    fn reshape_buffer(&mut self, name: &str, shape: TensorShape) -> Result<()>;

    /// Pointer to the start of the named buffer's storage on `device`.
    fn buffer_pointer(&self, name: &str, device: DeviceHandle) -> Result<DevicePtr>;

    /// Run one forward pass over the currently shaped inputs.
    async fn forward(&mut self) -> Result<()>;
}
