use std::collections::HashMap;
use teppan::constant::{BATCH_DIM, CHANNEL_DIM};
use teppan::{HostTensor, KernelError, NetModel, Result};

/// Scores each channel of a `(batch, channels, height, width)` input by its
/// mean intensity and softmaxes the scores into `prob`.
pub struct ChannelMeans;

impl NetModel for ChannelMeans {
    fn forward(&self, inputs: &HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>> {
        let data = inputs
            .get("data")
            .ok_or_else(|| KernelError::Engine("missing input 'data'".into()))?;
        let dims = data.shape.dims();
        let (batch, channels) = (dims[BATCH_DIM], dims[CHANNEL_DIM]);
        let plane = data.shape.count() / (batch * channels);

        let mut prob = Vec::with_capacity(batch * channels);
        for item in data.data.chunks(channels * plane) {
            let means: Vec<f32> = item
                .chunks(plane)
                .map(|values| values.iter().sum::<f32>() / plane as f32)
                .collect();
            let max = means.iter().cloned().fold(f32::MIN, f32::max);
            let exps: Vec<f32> = means.iter().map(|m| (m - max).exp()).collect();
            let total: f32 = exps.iter().sum();
            prob.extend(exps.iter().map(|e| e / total));
        }
        Ok(HashMap::from([("prob".to_string(), HostTensor::new([batch, channels], prob))]))
    }
}
