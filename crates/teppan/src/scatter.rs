//! Splitting batched engine outputs into per-item output rows.
//!
//! Every sub-batch gets one freshly allocated block holding all of its
//! outputs, laid out tensor-major: the `batch` items of the first output,
//! then the `batch` items of the second, and so on. Rows handed to the
//! output columns point into that block, so the block is released once,
//! by whoever owns the rows of the sub-batch.

use tracing::{trace, warn};
use crate::column::{BatchedColumn, Row};
use crate::constant::ELEMENT_BYTES;
use crate::device::{DeviceHandle, DevicePtr, MemoryRouter};
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};

/// Per-item sizes of every output tensor for one sub-batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub batch: usize,
    pub item_sizes: Vec<usize>,
}

impl OutputLayout {
    /// Size of the block holding the whole sub-batch
    pub fn total_bytes(&self) -> usize {
        self.item_sizes.iter().sum::<usize>() * self.batch
    }

    /// Rows appended across all output columns
    pub fn total_rows(&self) -> usize {
        self.item_sizes.len() * self.batch
    }

    /// Byte offset of output `tensor` within the block
    pub fn tensor_offset(&self, tensor: usize) -> usize {
        self.item_sizes[..tensor].iter().sum::<usize>() * self.batch
    }
}

/// Where one sub-batch's outputs ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScatterReport {
    pub block: DevicePtr,
    pub layout: OutputLayout,
}

/// Derive the per-item size of each output from the engine's current shapes.
pub fn plan_outputs<E>(engine: &E, layers: &[String], batch: usize) -> Result<OutputLayout>
where
    E: InferenceEngine + ?Sized,
{
    let item_sizes = layers
        .iter()
        .map(|name| {
            let shape = engine.buffer_shape(name)?;
            let count = shape.count();
            if batch == 0 || shape.batch() != batch || count % batch != 0 {
                return Err(KernelError::BatchDimensionMismatch {
                    name: name.clone(),
                    count,
                    batch,
                });
            }
            Ok(count / batch * ELEMENT_BYTES)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(OutputLayout { batch, item_sizes })
}

/// Copy every output buffer into a new block and append one row per item to
/// `outputs[i]` for output tensor `i`.
pub fn scatter_outputs<E>(
    engine: &E,
    router: &MemoryRouter,
    device: DeviceHandle,
    layers: &[String],
    batch: usize,
    outputs: &mut [BatchedColumn],
) -> Result<ScatterReport>
where
    E: InferenceEngine + ?Sized,
{
    if outputs.len() != layers.len() {
        return Err(KernelError::OutputColumnMismatch {
            expected: layers.len(),
            actual: outputs.len(),
        });
    }
    let layout = plan_outputs(engine, layers, batch)?;
    let srcs = layers
        .iter()
        .map(|name| engine.buffer_pointer(name, device))
        .collect::<Result<Vec<_>>>()?;
    let block = router.allocate(device, layout.total_bytes(), layout.total_rows())?;

    let starts: Vec<usize> = outputs.iter().map(BatchedColumn::len).collect();
    let mut dsts = Vec::with_capacity(layers.len());
    let mut sizes = Vec::with_capacity(layers.len());
    let mut offset = 0;
    for (tensor, column) in outputs.iter_mut().enumerate() {
        let item_size = layout.item_sizes[tensor];
        for _ in 0..batch {
            column.push(Row::new(block.add(offset), item_size));
            offset += item_size;
        }
        let dst = block.add(layout.tensor_offset(tensor));
        debug_assert_eq!(column.rows[starts[tensor]].ptr, dst);
        dsts.push(dst);
        sizes.push(item_size * batch);
    }

    if let Err(err) = router.copy_batch(&dsts, &srcs, &sizes) {
        for (column, len) in outputs.iter_mut().zip(starts) {
            column.truncate(len);
        }
        if let Err(free_err) = router.memory(device).and_then(|memory| memory.free(block)) {
            warn!(target: "teppan.scatter", %free_err, "failed to free output block");
        }
        return Err(err);
    }
    trace!(
        target: "teppan.scatter",
        rows = layout.total_rows(),
        bytes = layout.total_bytes(),
        "outputs scattered"
    );
    Ok(ScatterReport { block, layout })
}
