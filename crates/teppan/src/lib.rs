//! # Teppan
//!
//! A batched tensor inference kernel for columnar frame streams.
//!
//! ## Overview
//!
//! Frames arrive as columns of rows, where each row is a pointer and a byte
//! length in some device's memory. The kernel slices every invocation into
//! sub-batches of the configured batch size and, for each one, reshapes the
//! engine's input buffers, packs the rows into them, runs one forward pass,
//! and scatters the engine's output tensors back into per-item output rows.
//!
//! Key components include:
//!
//! - A dimension planner turning frame geometry into network input size
//! - A device capability layer with host and stream-ordered accelerator memory
//! - The [`InferenceEngine`] trait the kernel drives, plus a reference engine
//! - A background worker serving invocations in submission order
//!
//! ## Architecture
//!
//! ### Assumptions
//! Regardless of the engine used, teppan reserves dimensions with special meanings:
//!  - The `0th` dimension of every engine buffer is the batch dimension
//!  - The first input buffer is `(batch, channels, height, width)`
//!  - Every element is an `f32`
//!
//! ### Columns
//!
//! An invocation receives one input column per input layer followed by a
//! frame info column, whose rows encode the frame geometry. It produces one
//! output column per output layer. All columns of one invocation carry the
//! same number of rows.
//!
//! ### Devices
//!
//! Every pointer is tagged with the [`DeviceHandle`](device::DeviceHandle)
//! of the memory it lives in. The [`MemoryRouter`](device::MemoryRouter)
//! selects the matching [`DeviceMemory`](device::DeviceMemory) for each
//! operation and stages copies across devices through the host.
//!
//! ## Features
//!
//! - **candle** - Enables device memory backed by candle tensors
//!
//! ## Implementation Details
//!
//! Sub-batches run strictly in sequence because they share the engine's
//! buffers. Buffers are reshaped only when their shape changes, so a steady
//! stream of full batches at a fixed geometry never reallocates. Each
//! sub-batch writes all of its outputs into a single freshly allocated block
//! that the caller owns once `execute` returns.
//!

mod tensor;

/// Constants for client reference
pub use tensor::constant;
pub use tensor::{bytes_to_f32, f32_to_bytes, HostTensor, TensorShape};

pub mod column;
pub mod config;
pub mod copy;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod invoke;
pub mod kernel;
pub mod net;
pub mod planner;
pub mod profiler;
pub mod reshape;
pub mod scatter;
pub mod worker;

pub use column::{BatchedColumn, BatchedColumns, Row};
pub use config::KernelConfig;
pub use descriptor::{Channel, MeanImage, NetworkDescriptor};
pub use engine::InferenceEngine;
pub use error::{KernelError, Result};
pub use kernel::{ExecutionSummary, InferenceKernel, Invocation};
pub use net::{BlobNet, NetModel};
pub use planner::{AspectScaleMode, FrameGeometry, InputDims};
pub use profiler::{IntervalProfiler, Profiler};
pub use worker::{KernelWorker, Pending};
