//! Typed errors for the inference kernel.
//!
//! Nothing here is retried. Configuration errors are fatal for the lifetime
//! of a kernel, contract errors indicate a caller or registration bug, and
//! device errors surface immediately with no partial result.

use crate::device::DeviceHandle;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// All errors originating from the kernel, its devices and its engines.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("'preserve_aspect_ratio' requires one of input_width or input_height")]
    AspectRatioUnconstrained,

    #[error("'preserve_aspect_ratio' accepts only one of input_width or input_height, both were set")]
    AspectRatioOverconstrained,

    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(usize),

    #[error("failed to decode configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    // ── Column / shape contract ──────────────────────────────────────
    #[error(
        "# output columns in net descriptor ({expected}) does not match number of output \
         columns supplied ({actual})"
    )]
    OutputColumnMismatch { expected: usize, actual: usize },

    #[error("expected {expected} input columns (inputs plus frame info), got {actual}")]
    InputColumnMismatch { expected: usize, actual: usize },

    #[error("column {column} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        column: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row} of input '{tensor}' is {actual} bytes, buffer expects {expected} per item")]
    RowSizeMismatch {
        tensor: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("frame info column is empty")]
    MissingFrameInfo,

    #[error("frame info row is {0} bytes, expected 8")]
    MalformedFrameInfo(usize),

    #[error("frame geometry {width}x{height} has an empty side")]
    EmptyFrame { width: u32, height: u32 },

    #[error("padding {width}x{height} to a multiple of {pad} exceeds u32")]
    DimensionOverflow { width: u32, height: u32, pad: u32 },

    #[error("engine has no buffer named '{0}'")]
    UnknownBuffer(String),

    #[error("buffer '{name}' has rank {rank}, expected {expected}")]
    ShapeRankMismatch {
        name: String,
        rank: usize,
        expected: usize,
    },

    #[error("buffer '{name}' holds {count} elements, not divisible by batch {batch}")]
    BatchDimensionMismatch {
        name: String,
        count: usize,
        batch: usize,
    },

    #[error("batched copy lists disagree: {dsts} destinations, {srcs} sources, {sizes} sizes")]
    CopyListMismatch {
        dsts: usize,
        srcs: usize,
        sizes: usize,
    },

    // ── Device / runtime ─────────────────────────────────────────────
    #[error("no memory registered for device {0}")]
    DeviceUnavailable(DeviceHandle),

    #[error("buffer resides on {resident}, requested pointer for {requested}")]
    ResidencyMismatch {
        resident: DeviceHandle,
        requested: DeviceHandle,
    },

    #[error("pointer does not reference a live block on {0}")]
    InvalidPointer(DeviceHandle),

    #[error("access of {len} bytes at offset {offset} exceeds block of {block_len} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        block_len: usize,
    },

    #[error("failed to allocate {bytes} bytes on {device}")]
    AllocationFailed { device: DeviceHandle, bytes: usize },

    #[error("device memory lock poisoned")]
    LockPoisoned,

    #[error("inference engine error: {0}")]
    Engine(String),

    #[cfg(feature = "candle")]
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    // ── Worker ───────────────────────────────────────────────────────
    #[error("kernel worker stopped before the invocation completed")]
    WorkerStopped,
}

impl KernelError {
    /// Stable integer error code for structured logs.
    ///
    /// - 1xx: configuration
    /// - 2xx: column and shape contracts
    /// - 3xx: device and engine runtime
    /// - 4xx: worker
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Configuration(_) => 100,
            Self::AspectRatioUnconstrained => 101,
            Self::AspectRatioOverconstrained => 102,
            Self::InvalidBatchSize(_) => 103,
            Self::Toml(_) => 104,
            Self::Io(_) => 105,
            Self::OutputColumnMismatch { .. } => 200,
            Self::InputColumnMismatch { .. } => 201,
            Self::RowCountMismatch { .. } => 202,
            Self::RowSizeMismatch { .. } => 203,
            Self::MissingFrameInfo => 204,
            Self::MalformedFrameInfo(_) => 205,
            Self::UnknownBuffer(_) => 206,
            Self::ShapeRankMismatch { .. } => 207,
            Self::BatchDimensionMismatch { .. } => 208,
            Self::CopyListMismatch { .. } => 209,
            Self::EmptyFrame { .. } => 210,
            Self::DimensionOverflow { .. } => 211,
            Self::DeviceUnavailable(_) => 300,
            Self::ResidencyMismatch { .. } => 301,
            Self::InvalidPointer(_) => 302,
            Self::OutOfBounds { .. } => 303,
            Self::AllocationFailed { .. } => 304,
            Self::LockPoisoned => 305,
            Self::Engine(_) => 306,
            #[cfg(feature = "candle")]
            Self::Candle(_) => 307,
            Self::WorkerStopped => 400,
        }
    }

    /// Whether the error stems from the immutable kernel configuration and
    /// will therefore recur on every invocation.
    pub fn is_configuration(&self) -> bool {
        self.error_code() < 200
    }
}

impl<T> From<std::sync::PoisonError<T>> for KernelError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}
