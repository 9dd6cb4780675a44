//! Serving a kernel from a background task.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use futures::future::join_all;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use crate::column::BatchedColumns;
use crate::engine::InferenceEngine;
use crate::error::{KernelError, Result};
use crate::kernel::{InferenceKernel, Invocation};

struct Job {
    inputs: BatchedColumns,
    sender: oneshot::Sender<Result<Invocation>>,
}

/// The eventual result of a submitted invocation.
///
/// Resolves to [`KernelError::WorkerStopped`] if the worker shuts down
/// before serving it.
pub struct Pending {
    receiver: oneshot::Receiver<Result<Invocation>>,
}

impl Future for Pending {
    type Output = Result<Invocation>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(KernelError::WorkerStopped)))
    }
}

/// Owns one [`InferenceKernel`] on a tokio task.
///
/// Invocations are served one at a time in submission order, since they
/// all share the kernel's engine buffers. Dropping the worker stops the
/// task; invocations still queued at that point resolve to
/// [`KernelError::WorkerStopped`].
pub struct KernelWorker {
    /// Cleared to ask the serving task to stop
    running: Arc<AtomicBool>,

    /// Wakes the serving task when work is queued
    notifier: Arc<Notify>,

    queue: Arc<Mutex<VecDeque<Job>>>,

    /// Becomes `None` once shutdown has begun
    handle: Option<JoinHandle<()>>,
}

impl KernelWorker {
    /// Move `kernel` onto a new task and start serving.
    pub fn spawn<E>(kernel: InferenceKernel<E>) -> Self
    where
        E: InferenceEngine + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let handle = tokio::spawn(serve(kernel, running.clone(), notifier.clone(), queue.clone()));

        Self {
            running,
            notifier,
            queue,
            handle: Some(handle),
        }
    }

    /// Queue one invocation.
    pub async fn submit(&self, inputs: BatchedColumns) -> Pending {
        let (sender, receiver) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            // a dropped sender resolves the receiver to WorkerStopped
            if self.running.load(Ordering::SeqCst) {
                queue.push_back(Job { inputs, sender });
            }
        }
        self.notifier.notify_one();
        Pending { receiver }
    }

    /// Queue several invocations and wait for all of them, in order.
    pub async fn submit_all<I>(&self, batches: I) -> Vec<Result<Invocation>>
    where
        I: IntoIterator<Item = BatchedColumns>,
    {
        let mut pending = vec![];
        for inputs in batches {
            pending.push(self.submit(inputs).await);
        }
        join_all(pending).await
    }

    /// Whether the worker still accepts submissions
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the serving task to stop after its current invocation.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let _ = handle.await;
                    });
                }
                // dropping the handle detaches the serving task
                Err(_) => debug!(target: "teppan.worker", "no runtime to reap the serving task"),
            }
        }
    }
}

impl Drop for KernelWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve<E: InferenceEngine>(
    mut kernel: InferenceKernel<E>,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
    queue: Arc<Mutex<VecDeque<Job>>>,
) {
    while running.load(Ordering::SeqCst) {
        let job = queue.lock().await.pop_front();
        let Some(Job { inputs, sender }) = job else {
            // re-check the running flag periodically even without a wakeup
            let _ = tokio::time::timeout(Duration::from_millis(100), notifier.notified()).await;
            continue;
        };

        let result = kernel.run(&inputs).await;
        if let Err(err) = &result {
            warn!(target: "teppan.worker", code = err.error_code(), %err, "invocation failed");
        }
        let _ = sender.send(result);
    }

    let abandoned = queue.lock().await.drain(..).count();
    debug!(target: "teppan.worker", abandoned, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::column::{BatchedColumn, Row};
    use crate::config::KernelConfig;
    use crate::descriptor::NetworkDescriptor;
    use crate::device::{DeviceHandle, DeviceMemory, HostMemory, MemoryRouter};
    use crate::net::BlobNet;
    use crate::planner::FrameGeometry;
    use crate::tensor::{bytes_to_f32, f32_to_bytes, HostTensor, TensorShape};

    type Model = fn(&HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>>;

    fn negate(inputs: &HashMap<String, HostTensor>) -> Result<HashMap<String, HostTensor>> {
        let data = &inputs["data"];
        let negated = data.data.iter().map(|v| -v).collect();
        Ok(HashMap::from([("out".to_string(), HostTensor::new(data.shape.clone(), negated))]))
    }

    fn worker(host: Arc<HostMemory>) -> KernelWorker {
        let router = MemoryRouter::new().with(host.clone());
        let net = BlobNet::new(
            host,
            negate as Model,
            [("data", TensorShape::from([1, 1, 1, 1]))],
            [("out", TensorShape::from([1, 1, 1, 1]))],
        )
        .unwrap();
        let config = KernelConfig::new(2, DeviceHandle::host(), NetworkDescriptor::new(["data"], ["out"]));
        KernelWorker::spawn(InferenceKernel::new(config, net, router, 1).unwrap())
    }

    /// One-pixel frames holding `values`.
    fn inputs(host: &HostMemory, values: &[f32]) -> BatchedColumns {
        let mut data = BatchedColumn::new();
        let mut info = BatchedColumn::new();
        for value in values {
            let ptr = host.allocate(4, 1).unwrap();
            host.write(ptr, &f32_to_bytes(&[*value])).unwrap();
            data.push(Row::new(ptr, 4));

            let ptr = host.allocate(FrameGeometry::ENCODED_LEN, 1).unwrap();
            host.write(ptr, &FrameGeometry::new(1, 1).encode()).unwrap();
            info.push(Row::new(ptr, FrameGeometry::ENCODED_LEN));
        }
        vec![data, info]
    }

    fn values(host: &HostMemory, invocation: &Invocation) -> Vec<f32> {
        invocation.outputs[0]
            .rows
            .iter()
            .flat_map(|row| bytes_to_f32(&host.read(row.ptr, row.size).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_worker_serves_submission() {
        let host = Arc::new(HostMemory::new());
        let worker = worker(host.clone());

        let invocation = worker.submit(inputs(&host, &[1.0, 2.0, 3.0])).await.await.unwrap();

        assert_eq!(invocation.summary.sub_batches, vec![2, 1]);
        assert_eq!(values(&host, &invocation), vec![-1.0, -2.0, -3.0]);
    }

    #[tokio::test]
    async fn test_worker_preserves_order() {
        let host = Arc::new(HostMemory::new());
        let worker = worker(host.clone());

        let results = worker
            .submit_all((0..5).map(|i| inputs(&host, &[i as f32])))
            .await;

        let firsts: Vec<f32> = results
            .iter()
            .map(|result| values(&host, result.as_ref().unwrap())[0])
            .collect();
        assert_eq!(firsts, vec![0.0, -1.0, -2.0, -3.0, -4.0]);
    }

    #[tokio::test]
    async fn test_failed_invocation_does_not_stop_worker() {
        let host = Arc::new(HostMemory::new());
        let worker = worker(host.clone());

        let mut bad = inputs(&host, &[1.0, 2.0]);
        bad[0].rows[1].size = 8;
        let err = worker.submit(bad).await.await.unwrap_err();
        assert!(matches!(err, KernelError::RowSizeMismatch { row: 1, .. }));

        let invocation = worker.submit(inputs(&host, &[5.0])).await.await.unwrap();
        assert_eq!(values(&host, &invocation), vec![-5.0]);
        assert!(worker.is_running());
    }

    #[tokio::test]
    async fn test_worker_shutdown() {
        let host = Arc::new(HostMemory::new());
        let mut worker = worker(host.clone());
        assert!(worker.is_running());

        worker.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!worker.is_running());
        let err = worker.submit(inputs(&host, &[1.0])).await.await.unwrap_err();
        assert!(matches!(err, KernelError::WorkerStopped));
    }

    #[test]
    fn test_drop_outside_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let host = Arc::new(HostMemory::new());
        let worker = runtime.block_on(async { worker(host) });
        assert!(worker.is_running());

        drop(worker);
        drop(runtime);
    }
}
