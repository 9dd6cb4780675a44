//! # Device Memory
//!
//! This module provides a unified interface over the memory spaces a kernel
//! can run against, so that the copy and scatter logic is written once and
//! never branches on whether it targets the host or an accelerator.
//!
//! ## Feature Flags
//!
//! - `candle`: Enables [`CandleMemory`], storing blocks as candle tensors on
//!   a CPU or CUDA device
//!
//! ## Usage
//!
//! 1. Build one [`DeviceMemory`] per device the kernel touches
//! 2. Register them with a [`MemoryRouter`]
//! 3. Address memory only through [`DevicePtr`] values, which carry their
//!    device with them

mod core_trait;
mod host;
mod router;
mod stream;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle-backed device memory.
///
/// This module is only available when the `candle` feature flag is enabled.
pub mod candle;

pub use core_trait::{DeviceHandle, DeviceKind, DeviceMemory, DevicePtr};
pub use host::HostMemory;
pub use router::MemoryRouter;
pub use stream::StreamMemory;

#[cfg(feature = "candle")]
pub use candle::CandleMemory;
