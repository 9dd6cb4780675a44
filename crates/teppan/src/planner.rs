//! Spatial input dimensions for a frame stream.
//!
//! Planning is a pure function of the frame geometry and the descriptor's
//! policy fields: transpose, aspect preservation, explicit dimensions and
//! padding, applied in that order.

use serde::Deserialize;
use crate::descriptor::NetworkDescriptor;
use crate::error::{KernelError, Result};

/// Width and height of the frames currently flowing into the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    /// Byte length of an encoded frame info row
    pub const ENCODED_LEN: usize = 8;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Encode as a frame info row: width then height, little endian.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut row = [0; Self::ENCODED_LEN];
        row[..4].copy_from_slice(&self.width.to_le_bytes());
        row[4..].copy_from_slice(&self.height.to_le_bytes());
        row
    }

    /// Decode a frame info row written by [`encode`](Self::encode).
    pub fn decode(row: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::ENCODED_LEN] = row
            .try_into()
            .map_err(|_| KernelError::MalformedFrameInfo(row.len()))?;
        let [w0, w1, w2, w3, h0, h1, h2, h3] = bytes;
        Ok(Self {
            width: u32::from_le_bytes([w0, w1, w2, w3]),
            height: u32::from_le_bytes([h0, h1, h2, h3]),
        })
    }
}

/// How the aspect-preserving scale is applied when only `input_width` is set.
///
/// The two modes agree whenever `input_height` is the configured side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectScaleMode {
    /// Width takes the configured value but the scale is computed against
    /// the already-replaced width, so it is always 1 and the height keeps
    /// the frame's height. Matches long-standing deployed behaviour.
    #[default]
    Literal,
    /// Both sides are scaled by `input_width / frame_width`.
    Symmetric,
}

/// Planned spatial dimensions of the network input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputDims {
    pub width: u32,
    pub height: u32,
}

/// Compute the input `(width, height)` for frames of `frame`'s geometry.
///
/// Scaled sides truncate toward zero and never drop below 1.
pub fn plan_dimensions(
    frame: FrameGeometry,
    descriptor: &NetworkDescriptor,
    mode: AspectScaleMode,
) -> Result<InputDims> {
    if frame.width == 0 || frame.height == 0 {
        return Err(KernelError::EmptyFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    let (mut width, mut height) = if descriptor.transpose {
        (frame.height, frame.width)
    } else {
        (frame.width, frame.height)
    };

    if descriptor.preserve_aspect_ratio {
        match (descriptor.input_width, descriptor.input_height) {
            (Some(_), Some(_)) => return Err(KernelError::AspectRatioOverconstrained),
            (None, None) => return Err(KernelError::AspectRatioUnconstrained),
            (Some(target), None) => match mode {
                AspectScaleMode::Literal => width = target,
                AspectScaleMode::Symmetric => {
                    height = scale(height, target, width);
                    width = target;
                }
            },
            (None, Some(target)) => {
                width = scale(width, target, height);
                height = target;
            }
        }
    } else if let (Some(w), Some(h)) = (descriptor.input_width, descriptor.input_height) {
        width = w;
        height = h;
    }

    if let Some(pad) = descriptor.pad_mod {
        let padded = width.checked_next_multiple_of(pad).zip(height.checked_next_multiple_of(pad));
        (width, height) = padded.ok_or(KernelError::DimensionOverflow { width, height, pad })?;
    }

    Ok(InputDims { width, height })
}

/// `value * numerator / denominator`, truncated, in exact integer arithmetic.
fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = value as u64 * numerator as u64 / denominator as u64;
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}
