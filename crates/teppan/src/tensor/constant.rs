//! # Constants with reserved meanings in Teppan

/// In an engine buffer shape, Teppan reserves the `0th` dimension for batching
pub const BATCH_DIM: usize = 0;

/// Channel dimension of a network input buffer
pub const CHANNEL_DIM: usize = 1;

/// Height dimension of a network input buffer
pub const HEIGHT_DIM: usize = 2;

/// Width dimension of a network input buffer
pub const WIDTH_DIM: usize = 3;

/// Rank of a network input buffer: `(batch, channels, height, width)`
pub const INPUT_RANK: usize = 4;

/// Byte width of one engine buffer element (`f32`)
pub const ELEMENT_BYTES: usize = size_of::<f32>();
