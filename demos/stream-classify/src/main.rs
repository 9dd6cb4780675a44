mod model;

use std::sync::Arc;
use teppan::device::{DeviceMemory, HostMemory, MemoryRouter, StreamMemory};
use teppan::planner::plan_dimensions;
use teppan::{
    bytes_to_f32, f32_to_bytes, BatchedColumn, BatchedColumns, BlobNet, FrameGeometry, InferenceKernel,
    IntervalProfiler, KernelConfig, KernelWorker, Result, Row, TensorShape,
};
use tracing::info;
use crate::model::ChannelMeans;

const CONFIG: &str = r#"
batch_size = 4
device = { kind = "accelerator", id = 0 }
aspect_scale = "symmetric"

[net]
model = "channel-means.prototxt"
weights = "channel-means.bin"
input_layers = ["data"]
output_layers = ["prob"]
preserve_aspect_ratio = true
input_height = 24
pad_mod = 8
channel_ordering = ["red", "green", "blue"]

[net.mean-image]
empty = true
"#;

const CHANNELS: usize = 3;
const FRAMES_PER_INVOCATION: usize = 6;

/// Frames already resized to `width x height`, frame `i` brightest in
/// channel `i % 3`.
fn frames(host: &dyn DeviceMemory, geometry: FrameGeometry, width: u32, height: u32, first: usize) -> Result<BatchedColumns> {
    let plane = (width * height) as usize;
    let mut data = BatchedColumn::new();
    let mut info = BatchedColumn::new();
    for i in first..first + FRAMES_PER_INVOCATION {
        let pixels: Vec<f32> = (0..CHANNELS)
            .flat_map(|channel| {
                let value = if channel == i % CHANNELS { 1.0 } else { 0.1 };
                std::iter::repeat_n(value, plane)
            })
            .collect();
        let bytes = f32_to_bytes(&pixels);
        let ptr = host.allocate(bytes.len(), 1)?;
        host.write(ptr, &bytes)?;
        data.push(Row::new(ptr, bytes.len()));

        let encoded = geometry.encode();
        let ptr = host.allocate(encoded.len(), 1)?;
        host.write(ptr, &encoded)?;
        info.push(Row::new(ptr, encoded.len()));
    }
    Ok(vec![data, info])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => KernelConfig::from_path(path)?,
        None => KernelConfig::from_toml_str(CONFIG)?,
    };

    let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
    let router = MemoryRouter::new()
        .with(host.clone())
        .with(Arc::new(StreamMemory::new(0)));

    let geometry = FrameGeometry::new(64, 48);
    let dims = plan_dimensions(geometry, &config.net, config.aspect_scale)?;
    info!(width = dims.width, height = dims.height, "frames will be resized upstream");

    let engine = BlobNet::new(
        router.memory(config.device)?.clone(),
        ChannelMeans,
        [("data", TensorShape::from([1, CHANNELS, dims.height as usize, dims.width as usize]))],
        [("prob", TensorShape::from([1, CHANNELS]))],
    )?;
    let profiler = Arc::new(IntervalProfiler::new(config.device.id));
    let kernel = InferenceKernel::new(config, engine, router.clone(), 1)?.with_profiler(profiler.clone());
    let worker = KernelWorker::spawn(kernel);

    let batches = (0..3)
        .map(|n| frames(host.as_ref(), geometry, dims.width, dims.height, n * FRAMES_PER_INVOCATION))
        .collect::<Result<Vec<_>>>()?;

    for (n, result) in worker.submit_all(batches).await.into_iter().enumerate() {
        let invocation = result?;
        let classes = invocation.outputs[0]
            .rows
            .iter()
            .map(|row| -> Result<usize> {
                let prob = bytes_to_f32(&router.read(row.ptr, row.size)?);
                Ok(prob
                    .iter()
                    .enumerate()
                    .fold((0, f32::MIN), |best, (class, p)| if *p > best.1 { (class, *p) } else { best })
                    .0)
            })
            .collect::<Result<Vec<_>>>()?;
        println!(
            "invocation {} ({}): sub-batches {:?}, classes {:?}",
            n, invocation.summary.invocation, invocation.summary.sub_batches, classes
        );
        for block in &invocation.summary.blocks {
            router.memory(block.device)?.free(*block)?;
        }
    }

    info!(forward_ns = profiler.total_ns("net:forward"), "done");
    match profiler.to_trace_json() {
        Ok(trace) => println!("{trace}"),
        Err(err) => tracing::warn!(%err, "failed to export trace"),
    }
    Ok(())
}
