//! Kernel configuration loaded from TOML.

use std::path::Path;
use serde::Deserialize;
use crate::descriptor::NetworkDescriptor;
use crate::device::DeviceHandle;
use crate::error::{KernelError, Result};
use crate::planner::AspectScaleMode;

/// Settings fixed for the lifetime of one kernel instance.
///
/// ```toml
/// batch_size = 8
/// profiling = true
/// device = { kind = "accelerator", id = 0 }
///
/// [net]
/// model = "nets/resnet.prototxt"
/// weights = "nets/resnet.caffemodel"
/// input_layers = ["data"]
/// output_layers = ["prob"]
/// input_width = 224
/// input_height = 224
/// channel_ordering = ["blue", "green", "red"]
///
/// [net.mean-image]
/// empty = true
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct KernelConfig {
    /// Rows processed per forward pass
    pub batch_size: usize,
    /// Device every allocation and copy targets
    #[serde(default)]
    pub device: DeviceHandle,
    /// Record forward-pass intervals
    #[serde(default)]
    pub profiling: bool,
    /// How aspect-preserving scales are applied when only the width is set
    #[serde(default)]
    pub aspect_scale: AspectScaleMode,
    pub net: NetworkDescriptor,
}

impl KernelConfig {
    /// Settings with profiling off and [`AspectScaleMode::Literal`] scaling.
    ///
    /// Not validated; [`InferenceKernel::new`](crate::InferenceKernel::new) does that.
    pub fn new(batch_size: usize, device: DeviceHandle, net: NetworkDescriptor) -> Self {
        Self {
            batch_size,
            device,
            profiling: false,
            aspect_scale: AspectScaleMode::default(),
            net,
        }
    }

    /// Decode and [`validate`](Self::validate) a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: KernelConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` and decode it as [`from_toml_str`](Self::from_toml_str) does.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check the batch size and the network descriptor.
    ///
    /// Every error returned here is a configuration error and will recur
    /// until the configuration changes.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(KernelError::InvalidBatchSize(self.batch_size));
        }
        self.net.validate()
    }
}
