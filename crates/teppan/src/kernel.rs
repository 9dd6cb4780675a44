//! The batched inference kernel.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use crate::column::{BatchedColumn, BatchedColumns};
use crate::config::KernelConfig;
use crate::copy::{check_row_sizes, copy_inputs};
use crate::device::{DevicePtr, MemoryRouter};
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};
use crate::invoke::invoke;
use crate::planner::{plan_dimensions, AspectScaleMode, FrameGeometry, InputDims};
use crate::profiler::{IntervalProfiler, Profiler};
use crate::reshape::{ensure_batch, ensure_input_shape};
use crate::scatter::scatter_outputs;

/// What one [`InferenceKernel::execute`] call did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Identifier carried by this invocation's log span
    pub invocation: Uuid,
    /// Size of every sub-batch, in execution order
    pub sub_batches: Vec<usize>,
    /// Rows consumed from each input column
    pub rows: usize,
    /// One output block per sub-batch, owned by the caller
    pub blocks: Vec<DevicePtr>,
}

/// Output columns of a finished invocation together with its summary.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// One column per output layer
    pub outputs: BatchedColumns,
    pub summary: ExecutionSummary,
}

/// Drives an [`InferenceEngine`] over columnar batches of frames.
///
/// Input rows are processed in sub-batches of at most
/// [`KernelConfig::batch_size`], strictly one after another: reshape, copy
/// in, forward, scatter out. Spatial input dimensions are re-planned only
/// when the frame geometry changes.
///
/// # Example
///
/// ```ignore
/// let mut kernel = InferenceKernel::new(config, engine, router, 1)?;
/// let mut outputs = vec![BatchedColumn::new()];
/// let summary = kernel.execute(&inputs, &mut outputs).await?;
/// kernel.release_outputs(&summary)?;
/// ```
pub struct InferenceKernel<E> {
    config: KernelConfig,
    engine: E,
    router: MemoryRouter,
    profiler: Option<Arc<dyn Profiler>>,
    intervals: Option<Arc<IntervalProfiler>>,
    geometry: Option<FrameGeometry>,
    dims: Option<InputDims>,
}

impl<E: InferenceEngine> InferenceKernel<E> {
    /// Build a kernel whose caller will supply `output_columns` output
    /// columns per invocation.
    ///
    /// Fails before touching the engine when the configuration is invalid,
    /// the device has no registered memory, or the column count disagrees
    /// with the descriptor's output layers.
    pub fn new(config: KernelConfig, mut engine: E, router: MemoryRouter, output_columns: usize) -> Result<Self> {
        config.validate()?;
        router.memory(config.device)?;
        if output_columns != config.net.output_layers.len() {
            return Err(KernelError::OutputColumnMismatch {
                expected: config.net.output_layers.len(),
                actual: output_columns,
            });
        }

        let inputs = &config.net.input_layers;
        ensure_input_shape(&mut engine, &inputs[0], config.batch_size, None)?;
        for name in &inputs[1..] {
            ensure_batch(&mut engine, name, config.batch_size)?;
        }

        let intervals = config.profiling.then(|| Arc::new(IntervalProfiler::new(config.device.id)));
        let profiler = intervals.clone().map(|intervals| intervals as Arc<dyn Profiler>);

        info!(
            target: "teppan.kernel",
            device = %config.device,
            batch_size = config.batch_size,
            inputs = ?config.net.input_layers,
            outputs = ?config.net.output_layers,
            profiling = config.profiling,
            "kernel ready"
        );

        Ok(Self {
            config,
            engine,
            router,
            profiler,
            intervals,
            geometry: None,
            dims: None,
        })
    }

    /// Replace the profiler, enabling profiling if it was off.
    ///
    /// The profiler built from [`KernelConfig::profiling`] is dropped, so
    /// [`profiling`](Self::profiling) returns `None` afterwards.
    pub fn with_profiler(mut self, profiler: Arc<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self.intervals = None;
        self
    }

    /// The configuration this kernel was built from
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The engine being driven, for inspecting buffer shapes between invocations
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The router used for every copy and allocation
    pub fn router(&self) -> &MemoryRouter {
        &self.router
    }

    /// The sink forward passes are currently reported to, if any
    pub fn profiler(&self) -> Option<&Arc<dyn Profiler>> {
        self.profiler.as_ref()
    }

    /// Intervals recorded by the profiler that `profiling = true` enabled.
    ///
    /// `None` when profiling is off or was taken over by
    /// [`with_profiler`](Self::with_profiler).
    pub fn profiling(&self) -> Option<&Arc<IntervalProfiler>> {
        self.intervals.as_ref()
    }

    /// Planned spatial dimensions for the current frame geometry
    pub fn input_dims(&self) -> Option<InputDims> {
        self.dims
    }

    /// Re-plan input dimensions for frames of `geometry`.
    ///
    /// Returns `false` without touching the engine when the geometry is
    /// the one already planned for.
    pub fn new_frame_info(&mut self, geometry: FrameGeometry) -> Result<bool> {
        if self.geometry == Some(geometry) {
            return Ok(false);
        }
        let net = &self.config.net;
        if self.config.aspect_scale == AspectScaleMode::Literal
            && net.preserve_aspect_ratio
            && net.input_width.is_some()
        {
            warn!(
                target: "teppan.kernel",
                "aspect scale is literal: input_width replaces the frame width and the height is left unscaled"
            );
        }

        let dims = plan_dimensions(geometry, net, self.config.aspect_scale)?;
        ensure_input_shape(&mut self.engine, &net.input_layers[0], self.config.batch_size, Some(dims))?;
        info!(
            target: "teppan.kernel",
            frame_width = geometry.width,
            frame_height = geometry.height,
            width = dims.width,
            height = dims.height,
            "planned input dimensions"
        );
        self.geometry = Some(geometry);
        self.dims = Some(dims);
        Ok(true)
    }

    /// Run every row of `inputs` through the engine.
    ///
    /// `inputs` holds one column per input layer followed by the frame info
    /// column. One row per item is appended to each of `outputs`, which must
    /// hold one column per output layer. Column counts, row counts and row
    /// sizes are checked before anything is copied.
    ///
    /// On error no row is appended to `outputs` and every output block
    /// allocated by this call is freed.
    pub async fn execute(&mut self, inputs: &[BatchedColumn], outputs: &mut [BatchedColumn]) -> Result<ExecutionSummary> {
        self.execute_inner(Uuid::new_v4(), inputs, outputs).await
    }

    #[instrument(target = "teppan.kernel", level = "debug", name = "execute", skip_all, fields(%invocation))]
    async fn execute_inner(
        &mut self,
        invocation: Uuid,
        inputs: &[BatchedColumn],
        outputs: &mut [BatchedColumn],
    ) -> Result<ExecutionSummary> {
        let rows = self.check_columns(inputs, outputs)?;
        let mut summary = ExecutionSummary {
            invocation,
            sub_batches: vec![],
            rows,
            blocks: vec![],
        };
        if rows == 0 {
            return Ok(summary);
        }

        let (tensors, frame_info) = inputs.split_at(inputs.len() - 1);
        let frame_row = frame_info[0].rows[0];
        if frame_row.size != FrameGeometry::ENCODED_LEN {
            return Err(KernelError::MalformedFrameInfo(frame_row.size));
        }
        let geometry = FrameGeometry::decode(&self.router.read(frame_row.ptr, frame_row.size)?)?;
        self.new_frame_info(geometry)?;

        check_row_sizes(&self.engine, &self.config.net.input_layers, tensors, 0..rows)?;

        let starts: Vec<usize> = outputs.iter().map(BatchedColumn::len).collect();
        if let Err(err) = self.run_sub_batches(tensors, outputs, &mut summary).await {
            for (column, len) in outputs.iter_mut().zip(starts) {
                column.truncate(len);
            }
            for block in &summary.blocks {
                if let Err(free_err) = self.router.memory(block.device).and_then(|memory| memory.free(*block)) {
                    warn!(target: "teppan.kernel", %free_err, "failed to free output block");
                }
            }
            return Err(err);
        }
        Ok(summary)
    }

    /// Reshape, copy, forward and scatter every sub-batch in order, recording
    /// each finished one in `summary`.
    async fn run_sub_batches(
        &mut self,
        tensors: &[BatchedColumn],
        outputs: &mut [BatchedColumn],
        summary: &mut ExecutionSummary,
    ) -> Result<()> {
        let device = self.config.device;
        let input_layers = &self.config.net.input_layers;
        let output_layers = &self.config.net.output_layers;
        let rows = summary.rows;
        let mut start = 0;
        while start < rows {
            let end = rows.min(start + self.config.batch_size);
            let batch = end - start;

            ensure_input_shape(&mut self.engine, &input_layers[0], batch, None)?;
            for name in &input_layers[1..] {
                ensure_batch(&mut self.engine, name, batch)?;
            }
            copy_inputs(&self.engine, &self.router, device, input_layers, tensors, start..end)?;
            invoke(&mut self.engine, &self.router, device, self.profiler.as_deref()).await?;
            let report = scatter_outputs(&self.engine, &self.router, device, output_layers, batch, outputs)?;

            debug!(
                target: "teppan.kernel",
                sub_batch = summary.sub_batches.len(),
                rows = batch,
                output_bytes = report.layout.total_bytes(),
                "sub-batch complete"
            );
            summary.sub_batches.push(batch);
            summary.blocks.push(report.block);
            start = end;
        }
        Ok(())
    }

    /// Validate column counts and return the shared row count.
    fn check_columns(&self, inputs: &[BatchedColumn], outputs: &[BatchedColumn]) -> Result<usize> {
        let net = &self.config.net;
        if outputs.len() != net.output_layers.len() {
            return Err(KernelError::OutputColumnMismatch {
                expected: net.output_layers.len(),
                actual: outputs.len(),
            });
        }
        let expected = net.input_layers.len() + 1;
        if inputs.len() != expected {
            return Err(KernelError::InputColumnMismatch {
                expected,
                actual: inputs.len(),
            });
        }

        let (tensors, frame_info) = inputs.split_at(expected - 1);
        let rows = tensors[0].len();
        for (column, input) in tensors.iter().enumerate() {
            if input.len() != rows {
                return Err(KernelError::RowCountMismatch {
                    column,
                    expected: rows,
                    actual: input.len(),
                });
            }
        }
        let frame_rows = frame_info[0].len();
        if rows > 0 && frame_rows == 0 {
            return Err(KernelError::MissingFrameInfo);
        }
        if frame_rows != rows {
            return Err(KernelError::RowCountMismatch {
                column: expected - 1,
                expected: rows,
                actual: frame_rows,
            });
        }
        Ok(rows)
    }

    /// Execute into freshly created output columns.
    pub async fn run(&mut self, inputs: &[BatchedColumn]) -> Result<Invocation> {
        let mut outputs = vec![BatchedColumn::new(); self.config.net.output_layers.len()];
        let summary = self.execute(inputs, &mut outputs).await?;
        Ok(Invocation { outputs, summary })
    }

    /// Free the output blocks of a finished invocation. Rows that point into
    /// them must not be used afterwards.
    pub fn release_outputs(&self, summary: &ExecutionSummary) -> Result<()> {
        for block in &summary.blocks {
            self.router.memory(block.device)?.free(*block)?;
        }
        Ok(())
    }
}
