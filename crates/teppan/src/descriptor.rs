//! Immutable description of a network and its input preprocessing policy.

use std::path::PathBuf;
use serde::Deserialize;
use crate::error::{KernelError, Result};

/// A colour channel, used to order per-channel mean values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// Mean data subtracted from network inputs.
///
/// Exactly one form is ever present.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum MeanImage {
    /// No mean subtraction
    #[default]
    Empty,
    /// One scalar per channel, in the network's channel ordering
    Colors(Vec<f32>),
    /// A full `width × height × 3` float image
    Image {
        width: u32,
        height: u32,
        data: Vec<f32>,
    },
}

impl MeanImage {
    /// Arrange red, green and blue means in `ordering`.
    pub fn from_rgb(red: f32, green: f32, blue: f32, ordering: &[Channel]) -> Self {
        let colors = ordering
            .iter()
            .map(|channel| match channel {
                Channel::Red => red,
                Channel::Green => green,
                Channel::Blue => blue,
            })
            .collect();
        MeanImage::Colors(colors)
    }
}

/// Everything the kernel needs to know about a network.
///
/// Created once from configuration and read-only afterwards. Dimensions that
/// are unset in the configuration file (written as `-1`) are `None` here.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct NetworkDescriptor {
    pub model_path: PathBuf,
    pub weights_path: PathBuf,
    pub input_layers: Vec<String>,
    pub output_layers: Vec<String>,
    pub input_width: Option<u32>,
    pub input_height: Option<u32>,
    pub preserve_aspect_ratio: bool,
    pub pad_mod: Option<u32>,
    pub transpose: bool,
    pub normalize: bool,
    pub channel_ordering: Vec<Channel>,
    pub mean_image: MeanImage,
}

impl NetworkDescriptor {
    /// A descriptor with the given layers and every policy flag off.
    pub fn new<I, O>(input_layers: I, output_layers: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            model_path: PathBuf::new(),
            weights_path: PathBuf::new(),
            input_layers: input_layers.into_iter().map(Into::into).collect(),
            output_layers: output_layers.into_iter().map(Into::into).collect(),
            input_width: None,
            input_height: None,
            preserve_aspect_ratio: false,
            pad_mod: None,
            transpose: false,
            normalize: false,
            channel_ordering: vec![Channel::Blue, Channel::Green, Channel::Red],
            mean_image: MeanImage::Empty,
        }
    }

    /// Check the descriptor is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.input_layers.is_empty() {
            return Err(KernelError::Configuration(
                "'net.input_layers' must name at least one layer".into(),
            ));
        }
        if self.output_layers.is_empty() {
            return Err(KernelError::Configuration(
                "'net.output_layers' must name at least one layer".into(),
            ));
        }

        match (self.preserve_aspect_ratio, self.input_width, self.input_height) {
            (true, None, None) => return Err(KernelError::AspectRatioUnconstrained),
            (true, Some(_), Some(_)) => return Err(KernelError::AspectRatioOverconstrained),
            (false, Some(_), None) | (false, None, Some(_)) => {
                return Err(KernelError::Configuration(
                    "input_width and input_height must be set together unless \
                     'preserve_aspect_ratio' is enabled"
                        .into(),
                ));
            }
            _ => {}
        }

        if matches!(self.input_width, Some(0)) || matches!(self.input_height, Some(0)) {
            return Err(KernelError::Configuration("input dimensions must be positive".into()));
        }
        if matches!(self.pad_mod, Some(0)) {
            return Err(KernelError::Configuration("'pad_mod' must be positive or -1".into()));
        }

        match &self.mean_image {
            MeanImage::Colors(colors) if colors.len() != self.channel_ordering.len() => {
                Err(KernelError::Configuration(format!(
                    "{} mean colours for {} channels",
                    colors.len(),
                    self.channel_ordering.len()
                )))
            }
            MeanImage::Image { width, height, data }
                if data.len() != *width as usize * *height as usize * 3 =>
            {
                Err(KernelError::Configuration(format!(
                    "mean image of {}x{} needs {} values, got {}",
                    width,
                    height,
                    *width as usize * *height as usize * 3,
                    data.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct RawColors {
    red: f32,
    green: f32,
    blue: f32,
}

#[derive(Deserialize)]
struct RawMeanImage {
    colors: Option<RawColors>,
    width: Option<u32>,
    height: Option<u32>,
    data: Option<Vec<f32>>,
    #[serde(default)]
    empty: bool,
}

#[derive(Deserialize)]
struct RawDescriptor {
    model: PathBuf,
    weights: PathBuf,
    input_layers: Vec<String>,
    output_layers: Vec<String>,
    #[serde(default = "unset")]
    input_width: i64,
    #[serde(default = "unset")]
    input_height: i64,
    #[serde(default)]
    preserve_aspect_ratio: bool,
    #[serde(default = "unset")]
    pad_mod: i64,
    #[serde(default)]
    transpose: bool,
    #[serde(default)]
    normalize: bool,
    channel_ordering: Vec<Channel>,
    #[serde(rename = "mean-image")]
    mean_image: Option<RawMeanImage>,
}

fn unset() -> i64 {
    -1
}

fn optional_dimension(field: &str, value: i64) -> std::result::Result<Option<u32>, String> {
    match value {
        -1 => Ok(None),
        v if v > 0 && v <= u32::MAX as i64 => Ok(Some(v as u32)),
        v => Err(format!("'{field}' must be positive or -1, got {v}")),
    }
}

impl TryFrom<RawDescriptor> for NetworkDescriptor {
    type Error = String;

    fn try_from(raw: RawDescriptor) -> std::result::Result<Self, Self::Error> {
        let mean = raw
            .mean_image
            .ok_or("missing 'mean-image': colors, image data, or empty = true")?;
        let mean_image = match mean {
            RawMeanImage { colors: Some(c), .. } => {
                MeanImage::from_rgb(c.red, c.green, c.blue, &raw.channel_ordering)
            }
            RawMeanImage {
                width: Some(width),
                height: Some(height),
                data: Some(data),
                ..
            } => MeanImage::Image { width, height, data },
            RawMeanImage { data: Some(_), .. } => {
                return Err("'mean-image.data' requires width and height".into());
            }
            RawMeanImage { empty: true, .. } => MeanImage::Empty,
            _ => {
                return Err(
                    "'mean-image' must specify colors, image data, or that there is no mean".into(),
                );
            }
        };

        Ok(Self {
            model_path: raw.model,
            weights_path: raw.weights,
            input_layers: raw.input_layers,
            output_layers: raw.output_layers,
            input_width: optional_dimension("input_width", raw.input_width)?,
            input_height: optional_dimension("input_height", raw.input_height)?,
            preserve_aspect_ratio: raw.preserve_aspect_ratio,
            pad_mod: optional_dimension("pad_mod", raw.pad_mod)?,
            transpose: raw.transpose,
            normalize: raw.normalize,
            channel_ordering: raw.channel_ordering,
            mean_image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = r#"
        model = "nets/googlenet.prototxt"
        weights = "nets/googlenet.caffemodel"
        input_layers = ["data"]
        output_layers = ["prob", "pool5"]
        input_height = 224
        preserve_aspect_ratio = true
        pad_mod = 8
        channel_ordering = ["blue", "green", "red"]

        [mean-image.colors]
        red = 122.0
        green = 116.0
        blue = 104.0
    "#;

    #[test]
    fn test_parse_orders_mean_colors_by_channel() {
        let descriptor: NetworkDescriptor = toml::from_str(NET).unwrap();
        assert_eq!(descriptor.input_width, None);
        assert_eq!(descriptor.input_height, Some(224));
        assert_eq!(descriptor.pad_mod, Some(8));
        assert_eq!(descriptor.mean_image, MeanImage::Colors(vec![104.0, 116.0, 122.0]));
        assert_eq!(descriptor.output_layers, vec!["prob", "pool5"]);
        descriptor.validate().unwrap();
    }

    #[test]
    fn test_minus_one_means_unset() {
        let net = NET.replace("pad_mod = 8", "pad_mod = -1");
        let descriptor: NetworkDescriptor = toml::from_str(&net).unwrap();
        assert_eq!(descriptor.pad_mod, None);
    }

    #[test]
    fn test_non_positive_dimension_is_rejected() {
        let net = NET.replace("pad_mod = 8", "pad_mod = 0");
        assert!(toml::from_str::<NetworkDescriptor>(&net).is_err());
    }

    #[test]
    fn test_missing_mean_image_is_rejected() {
        let net = NET.split("[mean-image.colors]").next().unwrap();
        let err = toml::from_str::<NetworkDescriptor>(net).unwrap_err();
        assert!(err.to_string().contains("mean-image"));
    }

    #[test]
    fn test_empty_mean() {
        let net = format!("{}\n[mean-image]\nempty = true\n", NET.split("[mean-image.colors]").next().unwrap());
        let descriptor: NetworkDescriptor = toml::from_str(&net).unwrap();
        assert_eq!(descriptor.mean_image, MeanImage::Empty);
    }

    #[test]
    fn test_aspect_without_dimension_is_configuration_error() {
        let mut descriptor = NetworkDescriptor::new(["data"], ["prob"]);
        descriptor.preserve_aspect_ratio = true;
        assert!(matches!(descriptor.validate(), Err(KernelError::AspectRatioUnconstrained)));

        descriptor.input_width = Some(224);
        descriptor.input_height = Some(224);
        assert!(matches!(descriptor.validate(), Err(KernelError::AspectRatioOverconstrained)));
    }

    #[test]
    fn test_half_specified_dimensions_are_rejected() {
        let mut descriptor = NetworkDescriptor::new(["data"], ["prob"]);
        descriptor.input_width = Some(224);
        assert!(matches!(descriptor.validate(), Err(KernelError::Configuration(_))));
    }

    #[test]
    fn test_mean_image_size_is_checked() {
        let mut descriptor = NetworkDescriptor::new(["data"], ["prob"]);
        descriptor.mean_image = MeanImage::Image {
            width: 2,
            height: 2,
            data: vec![0.0; 11],
        };
        assert!(descriptor.validate().is_err());
        descriptor.mean_image = MeanImage::Image {
            width: 2,
            height: 2,
            data: vec![0.0; 12],
        };
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_requires_layers() {
        let descriptor = NetworkDescriptor::new(Vec::<String>::new(), ["prob"]);
        assert!(descriptor.validate().is_err());
    }
}
