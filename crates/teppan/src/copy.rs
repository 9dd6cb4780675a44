//! Packing a sub-batch of input rows into the engine's input buffers.

use std::ops::Range;
use tracing::trace;
use crate::column::BatchedColumn;
use crate::device::{DeviceHandle, MemoryRouter};
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};

/// What [`copy_inputs`] moved, per input tensor in descriptor order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub rows: Vec<usize>,
    pub bytes: Vec<usize>,
}

/// Per-item byte footprint of buffer `name` at its current shape.
pub fn item_bytes<E>(engine: &E, name: &str) -> Result<usize>
where
    E: InferenceEngine + ?Sized,
{
    let shape = engine.buffer_shape(name)?;
    let batch = shape.batch();
    if batch == 0 || shape.count() % batch != 0 {
        return Err(KernelError::BatchDimensionMismatch {
            name: name.to_string(),
            count: shape.count(),
            batch,
        });
    }
    Ok(shape.byte_len() / batch)
}

/// Check rows `range` of every input column against the per-item footprint
/// of the buffer it feeds.
///
/// Fails when `columns` does not hold exactly one column per layer or when
/// a column is shorter than `range.end`.
pub fn check_row_sizes<E>(engine: &E, layers: &[String], columns: &[BatchedColumn], range: Range<usize>) -> Result<()>
where
    E: InferenceEngine + ?Sized,
{
    if columns.len() != layers.len() {
        return Err(KernelError::InputColumnMismatch {
            expected: layers.len(),
            actual: columns.len(),
        });
    }
    for (column, input) in columns.iter().enumerate() {
        if input.len() < range.end {
            return Err(KernelError::RowCountMismatch {
                column,
                expected: range.end,
                actual: input.len(),
            });
        }
    }

    for (name, column) in layers.iter().zip(columns) {
        let expected = item_bytes(engine, name)?;
        let rows = column.rows.get(range.clone()).unwrap_or_default();
        for (ordinal, row) in rows.iter().enumerate() {
            if row.size != expected {
                return Err(KernelError::RowSizeMismatch {
                    tensor: name.clone(),
                    row: range.start + ordinal,
                    expected,
                    actual: row.size,
                });
            }
        }
    }
    Ok(())
}

/// Copy rows `range` of each input column into the matching engine buffer.
///
/// `layers[i]` names the buffer fed by `columns[i]`. Rows are packed
/// contiguously in row order, so batch ordinal `j` lands at
/// `j * item_bytes`. Every row is checked against the buffer's per-item
/// footprint before any copy is issued.
pub fn copy_inputs<E>(
    engine: &E,
    router: &MemoryRouter,
    device: DeviceHandle,
    layers: &[String],
    columns: &[BatchedColumn],
    range: Range<usize>,
) -> Result<CopyReport>
where
    E: InferenceEngine + ?Sized,
{
    check_row_sizes(engine, layers, columns, range.clone())?;
    let batch = range.len();
    let mut targets = Vec::with_capacity(layers.len());
    for name in layers {
        let shape = engine.buffer_shape(name)?;
        if shape.batch() != batch {
            return Err(KernelError::BatchDimensionMismatch {
                name: name.clone(),
                count: shape.count(),
                batch,
            });
        }
        targets.push(engine.buffer_pointer(name, device)?);
    }

    let mut report = CopyReport::default();
    for ((name, column), dst) in layers.iter().zip(columns).zip(targets) {
        let mut offset = 0;
        for row in &column.rows[range.clone()] {
            router.copy(dst.add(offset), row.ptr, row.size)?;
            offset += row.size;
        }
        trace!(target: "teppan.copy", tensor = name.as_str(), rows = batch, bytes = offset, "packed input");
        report.rows.push(batch);
        report.bytes.push(offset);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use crate::column::Row;
    use crate::device::{DeviceMemory, HostMemory, StreamMemory};
    use crate::net::BlobNet;
    use crate::tensor::{bytes_to_f32, f32_to_bytes, HostTensor, TensorShape};

    type Model = fn(&HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>>;

    fn identity(inputs: &HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>> {
        Ok(HashMap::from([("out".to_string(), inputs["a"].clone())]))
    }

    fn column(memory: &dyn DeviceMemory, items: &[Vec<f32>]) -> BatchedColumn {
        items
            .iter()
            .map(|item| {
                let bytes = f32_to_bytes(item);
                let ptr = memory.allocate(bytes.len(), 1).unwrap();
                memory.write(ptr, &bytes).unwrap();
                Row::new(ptr, bytes.len())
            })
            .collect()
    }

    fn net(memory: Arc<dyn DeviceMemory>, batch: usize) -> BlobNet<Model> {
        BlobNet::new(
            memory,
            identity as Model,
            [
                ("a", TensorShape::from([batch, 1, 1, 2])),
                ("b", TensorShape::from([batch, 3])),
            ],
            [("out", TensorShape::from([batch, 1, 1, 2]))],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_pack_in_order_for_every_input() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let router = MemoryRouter::new().with(host.clone());
        let net = net(host.clone(), 2);
        let layers = vec!["a".to_string(), "b".to_string()];
        let a = column(host.as_ref(), &[vec![0.0, 0.5], vec![1.0, 1.5], vec![2.0, 2.5]]);
        let b = column(host.as_ref(), &[vec![0.0; 3], vec![7.0, 8.0, 9.0], vec![4.0, 5.0, 6.0]]);

        let report = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a, b], 1..3).unwrap();

        assert_eq!(report.rows, vec![2, 2]);
        assert_eq!(report.bytes, vec![16, 24]);
        assert_eq!(net.read_blob("a").unwrap().data, vec![1.0, 1.5, 2.0, 2.5]);
        assert_eq!(net.read_blob("b").unwrap().data, vec![7.0, 8.0, 9.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_bytes_match_buffer_size() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let router = MemoryRouter::new().with(host.clone());
        let net = net(host.clone(), 3);
        let layers = vec!["a".to_string()];
        let a = column(host.as_ref(), &[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);

        let report = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a], 0..3).unwrap();
        assert_eq!(report.bytes[0], net.buffer_shape("a").unwrap().byte_len());
    }

    #[test]
    fn test_wrong_row_size_fails_before_any_copy() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let router = MemoryRouter::new().with(host.clone());
        let net = net(host.clone(), 2);
        let layers = vec!["a".to_string(), "b".to_string()];
        let a = column(host.as_ref(), &[vec![5.0, 5.0], vec![6.0, 6.0]]);
        let b = column(host.as_ref(), &[vec![1.0, 2.0, 3.0], vec![1.0, 2.0]]);

        let err = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a, b], 0..2).unwrap_err();

        assert!(matches!(
            err,
            KernelError::RowSizeMismatch { row: 1, expected: 12, actual: 8, .. }
        ));
        assert_eq!(net.read_blob("a").unwrap().data, vec![0.0; 4]);
    }

    #[test]
    fn test_buffer_batch_must_match_sub_batch() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let router = MemoryRouter::new().with(host.clone());
        let net = net(host.clone(), 4);
        let layers = vec!["a".to_string()];
        let a = column(host.as_ref(), &[vec![1.0, 1.0], vec![2.0, 2.0]]);

        let err = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a], 0..2).unwrap_err();
        assert!(matches!(err, KernelError::BatchDimensionMismatch { batch: 2, .. }));
    }

    #[test]
    fn test_host_rows_into_accelerator_buffers() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let accel: Arc<dyn DeviceMemory> = Arc::new(StreamMemory::new(0));
        let router = MemoryRouter::new().with(host.clone()).with(accel.clone());
        let net = net(accel.clone(), 1);
        let layers = vec!["a".to_string()];
        let a = column(host.as_ref(), &[vec![3.0, 4.0]]);

        copy_inputs(&net, &router, DeviceHandle::accelerator(0), &layers, &[a], 0..1).unwrap();

        let ptr = net.buffer_pointer("a", DeviceHandle::accelerator(0)).unwrap();
        assert_eq!(bytes_to_f32(&accel.read(ptr, 8).unwrap()), vec![3.0, 4.0]);
    }

    #[test]
    fn test_host_device_against_accelerator_buffers_is_refused() {
        let accel: Arc<dyn DeviceMemory> = Arc::new(StreamMemory::new(0));
        let router = MemoryRouter::new().with(accel.clone());
        let net = net(accel.clone(), 1);
        let layers = vec!["a".to_string()];
        let a = column(accel.as_ref(), &[vec![3.0, 4.0]]);

        let err = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a], 0..1).unwrap_err();
        assert!(matches!(err, KernelError::ResidencyMismatch { .. }));
    }

    #[test]
    fn test_short_or_missing_columns_are_refused() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let router = MemoryRouter::new().with(host.clone());
        let net = net(host.clone(), 2);
        let layers = vec!["a".to_string(), "b".to_string()];
        let a = column(host.as_ref(), &[vec![1.0, 1.0], vec![2.0, 2.0]]);

        let err = copy_inputs(&net, &router, DeviceHandle::host(), &layers, &[a.clone()], 0..2).unwrap_err();
        assert!(matches!(err, KernelError::InputColumnMismatch { expected: 2, actual: 1 }));

        let err = copy_inputs(&net, &router, DeviceHandle::host(), &layers[..1], &[a], 1..3).unwrap_err();
        assert!(matches!(err, KernelError::RowCountMismatch { column: 0, expected: 3, actual: 2 }));
        assert_eq!(net.read_blob("a").unwrap().data, vec![0.0; 4]);
    }

    #[test]
    fn test_row_sizes_checked_across_whole_range() {
        let host: Arc<dyn DeviceMemory> = Arc::new(HostMemory::new());
        let net = net(host.clone(), 2);
        let layers = vec!["a".to_string()];
        let a = column(host.as_ref(), &[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0, 3.0], vec![4.0, 4.0]]);

        check_row_sizes(&net, &layers, std::slice::from_ref(&a), 0..2).unwrap();
        let err = check_row_sizes(&net, &layers, &[a], 0..4).unwrap_err();
        assert!(matches!(err, KernelError::RowSizeMismatch { row: 2, expected: 8, actual: 12, .. }));
    }
}
