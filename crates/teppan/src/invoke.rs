use std::time::Instant;
use tracing::trace;
use crate::device::{DeviceHandle, MemoryRouter};
use crate::engine::InferenceEngine;
use crate::error::Result;
use crate::profiler::Profiler;

/// Label of the interval recorded around every forward pass.
pub const FORWARD_LABEL: &str = "net:forward";

/// Run one forward pass.
///
/// With a profiler attached the device is synchronized before the interval
/// closes, so the recorded time covers the device work and not only its
/// enqueueing. Without one the call may return while work is still in flight.
pub async fn invoke<E>(
    engine: &mut E,
    router: &MemoryRouter,
    device: DeviceHandle,
    profiler: Option<&dyn Profiler>,
) -> Result<()>
where
    E: InferenceEngine + ?Sized,
{
    let start = Instant::now();
    engine.forward().await?;
    if let Some(profiler) = profiler {
        router.synchronize(device)?;
        let end = Instant::now();
        profiler.add_interval(FORWARD_LABEL, start, end);
        trace!(target: "teppan.invoke", elapsed = ?(end - start), "forward complete");
    }
    Ok(())
}
