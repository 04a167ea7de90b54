//! Device acquisition and queue submission.

use crate::encoder::SealedSequence;
use crate::error::{ConfigurationError, UnavailableError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::{Adapter, Backends, Device, Instance, Queue};

/// The position of a submission in the context’s FIFO queue.
///
/// Monotonically increasing per [`GpuContext`]; the first submission is 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubmissionIndex(
    /// One-based position of the submission in the queue.
    pub u64,
);

/// An active connection to a gpu: instance, adapter, device and queue,
/// plus the bookkeeping needed to tell whether a buffer is still
/// referenced by in-flight work.
///
/// The context is the "device handle" of the pipeline: buffers, command
/// sequences and compute stages borrow it per call and never own it.
pub struct GpuContext {
    _instance: Instance,
    _adapter: Adapter,
    device: Arc<Device>,
    queue: Queue,
    // FIFO watermarks: number of sequences submitted, and the highest
    // submission count known to have completed on the device.
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl GpuContext {
    /// Initializes a device and its queue on any available backend.
    ///
    /// Returns [`UnavailableError`] when the host has no compatible
    /// adapter or the adapter refuses to open a device. Nothing is
    /// allocated in that case.
    pub async fn new() -> Result<Self, UnavailableError> {
        Self::with_backends(Backends::all()).await
    }

    /// Initializes a device restricted to the given backends.
    pub async fn with_backends(backends: Backends) -> Result<Self, UnavailableError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or(UnavailableError::NoAdapter)?;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        Ok(Self {
            _instance: instance,
            _adapter: adapter,
            device: Arc::new(device),
            queue,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })
    }

    /// The `wgpu` device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The shared `wgpu` device.
    pub fn device_arc(&self) -> Arc<Device> {
        self.device.clone()
    }

    /// The `wgpu` queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Enqueues a sealed command sequence on the device queue.
    ///
    /// Submission is non-blocking: the device executes on its own
    /// timeline, FIFO with respect to other submissions on this context.
    /// The sequence is consumed; executing the same sealed unit twice is
    /// unrepresentable.
    ///
    /// Fails with [`ConfigurationError::MappedInUse`] if any buffer the
    /// sequence references is currently mapped for CPU access.
    pub fn submit(&self, sealed: SealedSequence) -> Result<SubmissionIndex, ConfigurationError> {
        let (commands, tracks) = sealed.into_parts();
        for track in &tracks {
            if track.is_mapped() {
                return Err(ConfigurationError::MappedInUse);
            }
        }

        let index = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        for track in &tracks {
            track.mark_submitted(index);
        }
        self.queue.submit(Some(commands));
        Ok(SubmissionIndex(index))
    }

    /// Blocks until every submission made so far has completed on the
    /// device, then advances the completion watermark accordingly.
    pub fn wait_idle(&self) {
        let snapshot = self.submitted.load(Ordering::Relaxed);
        self.device.poll(wgpu::Maintain::wait()).panic_on_timeout();
        self.completed.fetch_max(snapshot, Ordering::Relaxed);
    }

    /// Number of sequences submitted on this context so far.
    pub(crate) fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Highest submission count observed complete.
    pub(crate) fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Records that every submission up to `snapshot` has completed.
    pub(crate) fn observe_completed(&self, snapshot: u64) {
        self.completed.fetch_max(snapshot, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::GpuContext;
    use crate::buffer::GpuBuffer;
    use crate::encoder::CommandSequence;
    use crate::error::{ConfigurationError, PipelineError, UnavailableError};
    use wgpu::BufferUsages;

    #[futures_test::test]
    #[serial_test::serial]
    async fn no_backend_is_unavailable_not_a_crash() {
        let result = GpuContext::with_backends(wgpu::Backends::empty()).await;
        assert!(matches!(result, Err(UnavailableError::NoAdapter)));
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn submitting_a_mapped_buffer_fails_fast() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let src = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
        )
        .unwrap();
        let dst = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )
        .unwrap();

        let mut sequence = CommandSequence::new(&gpu);
        sequence.copy_buffer_to_buffer(&src, 0, &dst, 0, 4).unwrap();
        let sealed = sequence.seal().unwrap();

        // Map after sealing, before submitting.
        let region = src.map_write(&gpu).await.unwrap();
        assert!(matches!(
            gpu.submit(sealed),
            Err(ConfigurationError::MappedInUse)
        ));
        region.unmap();
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn map_write_of_an_in_flight_buffer_fails_fast() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let src = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
        )
        .unwrap();
        let dst = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )
        .unwrap();

        let mut sequence = CommandSequence::new(&gpu);
        sequence.copy_buffer_to_buffer(&src, 0, &dst, 0, 4).unwrap();
        gpu.submit(sequence.seal().unwrap()).unwrap();

        assert!(matches!(
            src.map_write(&gpu).await,
            Err(PipelineError::Configuration(ConfigurationError::InFlight))
        ));

        // Waiting for idle advances the watermark and makes it legal again.
        gpu.wait_idle();
        let region = src.map_write(&gpu).await.unwrap();
        region.unmap();
    }
}
