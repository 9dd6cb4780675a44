//! Reshaping engine input buffers only when their shape actually changes.

use tracing::debug;
use crate::constant::{BATCH_DIM, CHANNEL_DIM, HEIGHT_DIM, INPUT_RANK, WIDTH_DIM};
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};
use crate::planner::InputDims;
use crate::tensor::TensorShape;

/// Make the primary input buffer `(batch, channels, height, width)`.
///
/// `dims` replaces the spatial dimensions when given; otherwise they are
/// kept. The channel count always comes from the engine. Returns whether a
/// reshape was issued; nothing is called when the shape already matches.
pub fn ensure_input_shape<E>(engine: &mut E, name: &str, batch: usize, dims: Option<InputDims>) -> Result<bool>
where
    E: InferenceEngine + ?Sized,
{
    let current = engine.buffer_shape(name)?;
    if current.rank() != INPUT_RANK {
        return Err(KernelError::ShapeRankMismatch {
            name: name.to_string(),
            rank: current.rank(),
            expected: INPUT_RANK,
        });
    }
    let current_dims = current.dims();
    let (height, width) = match dims {
        Some(dims) => (dims.height as usize, dims.width as usize),
        None => (current_dims[HEIGHT_DIM], current_dims[WIDTH_DIM]),
    };
    let target = TensorShape::from([batch, current_dims[CHANNEL_DIM], height, width]);
    reshape_if_changed(engine, name, current, target)
}

/// Set only the batch dimension of a buffer of any rank.
pub fn ensure_batch<E>(engine: &mut E, name: &str, batch: usize) -> Result<bool>
where
    E: InferenceEngine + ?Sized,
{
    let current = engine.buffer_shape(name)?;
    if current.dims().get(BATCH_DIM) == Some(&batch) {
        return Ok(false);
    }
    let target = current.with_batch(batch);
    reshape_if_changed(engine, name, current, target)
}

fn reshape_if_changed<E>(engine: &mut E, name: &str, current: TensorShape, target: TensorShape) -> Result<bool>
where
    E: InferenceEngine + ?Sized,
{
    if current == target {
        return Ok(false);
    }
    debug!(target: "teppan.reshape", name, from = %current, to = %target, "reshaping buffer");
    engine.reshape_buffer(name, target)?;
    Ok(true)
}
