//! Gpu buffer allocation, mapping, and readback.

use crate::error::{ConfigurationError, PipelineError};
use crate::gpu::GpuContext;
use bytemuck::Pod;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::{
    Buffer, BufferDescriptor, BufferUsages, BufferView, BufferViewMut, COPY_BUFFER_ALIGNMENT,
};

/// Shared map/in-flight state of one buffer.
///
/// Command sequences keep a clone of this so the context can fail fast on
/// submitting a mapped buffer, or on mapping a buffer a pending submission
/// still references.
pub(crate) struct BufferTrack {
    mapped: AtomicBool,
    last_submission: AtomicU64,
}

impl BufferTrack {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mapped: AtomicBool::new(false),
            last_submission: AtomicU64::new(0),
        })
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Relaxed)
    }

    fn set_mapped(&self, mapped: bool) {
        self.mapped.store(mapped, Ordering::Relaxed);
    }

    pub(crate) fn mark_submitted(&self, index: u64) {
        self.last_submission.fetch_max(index, Ordering::Relaxed);
    }

    fn last_submission(&self) -> u64 {
        self.last_submission.load(Ordering::Relaxed)
    }
}

/// Size actually allocated for a buffer initialized with `len` content
/// bytes: the smallest multiple of 4 that holds them, and at least 4.
pub fn padded_init_size(len: u64) -> u64 {
    (len.div_ceil(COPY_BUFFER_ALIGNMENT).max(1)) * COPY_BUFFER_ALIGNMENT
}

// MAP_READ and MAP_WRITE only combine with the matching copy usage; every
// other pairing is rejected by the platform, so fail before the device does.
fn validate_usage(usage: BufferUsages) -> Result<(), ConfigurationError> {
    if usage.contains(BufferUsages::MAP_READ)
        && !(BufferUsages::MAP_READ | BufferUsages::COPY_DST).contains(usage)
    {
        return Err(ConfigurationError::ForbiddenUsage(usage));
    }
    if usage.contains(BufferUsages::MAP_WRITE)
        && !(BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC).contains(usage)
    {
        return Err(ConfigurationError::ForbiddenUsage(usage));
    }
    Ok(())
}

/// A fixed-size byte region on the device with a usage flag set.
///
/// A buffer’s usage flags must be a superset of every operation applied
/// to it; the pipeline checks this before any device call. CPU access
/// goes through the `Unmapped -> map -> Mapped -> unmap -> Unmapped`
/// state machine tracked on the buffer itself.
pub struct GpuBuffer {
    buffer: Buffer,
    usage: BufferUsages,
    size: u64,
    track: Arc<BufferTrack>,
}

impl GpuBuffer {
    /// Allocates a buffer pre-filled with `contents`.
    ///
    /// The buffer is created CPU-mapped, sized to [`padded_init_size`] of
    /// the content length, filled, then unmapped before being returned, so
    /// it is immediately usable by the device.
    pub fn init(
        ctx: &GpuContext,
        contents: &[u8],
        usage: BufferUsages,
    ) -> Result<Self, ConfigurationError> {
        validate_usage(usage)?;
        let size = padded_init_size(contents.len() as u64);
        let buffer = ctx.device().create_buffer(&BufferDescriptor {
            label: None,
            size,
            usage,
            mapped_at_creation: true,
        });
        buffer
            .slice(..)
            .get_mapped_range_mut()[..contents.len()]
            .copy_from_slice(contents);
        buffer.unmap();

        Ok(Self {
            buffer,
            usage,
            size,
            track: BufferTrack::new(),
        })
    }

    /// Allocates a buffer pre-filled with a typed slice.
    pub fn init_pod<T: Pod>(
        ctx: &GpuContext,
        contents: &[T],
        usage: BufferUsages,
    ) -> Result<Self, ConfigurationError> {
        Self::init(ctx, bytemuck::cast_slice(contents), usage)
    }

    /// Allocates an uninitialized, device-owned buffer of `size` bytes.
    pub fn uninit(
        ctx: &GpuContext,
        size: u64,
        usage: BufferUsages,
    ) -> Result<Self, ConfigurationError> {
        validate_usage(usage)?;
        let buffer = ctx.device().create_buffer(&BufferDescriptor {
            label: None,
            size,
            usage,
            mapped_at_creation: false,
        });

        Ok(Self {
            buffer,
            usage,
            size,
            track: BufferTrack::new(),
        })
    }

    /// The underlying `wgpu` buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The buffer’s size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsages {
        self.usage
    }

    /// Whether the buffer is currently mapped for CPU access.
    pub fn is_mapped(&self) -> bool {
        self.track.is_mapped()
    }

    pub(crate) fn track(&self) -> Arc<BufferTrack> {
        self.track.clone()
    }

    /// Ensures the buffer allows `needed` in addition to its other uses.
    pub(crate) fn require_usage(&self, needed: BufferUsages) -> Result<(), ConfigurationError> {
        if !self.usage.contains(needed) {
            return Err(ConfigurationError::MissingUsage {
                needed,
                actual: self.usage,
            });
        }
        Ok(())
    }

    // Waits until the device signals that mapping the whole buffer in
    // `mode` completed. This is the pipeline’s only suspension point.
    async fn wait_mapped(&self, ctx: &GpuContext, mode: wgpu::MapMode) -> Result<(), PipelineError> {
        let buffer_slice = self.buffer.slice(..);
        let snapshot = ctx.submitted_count();

        #[cfg(not(target_arch = "wasm32"))]
        let status = {
            let (sender, receiver) = async_channel::bounded(1);
            buffer_slice.map_async(mode, move |v| sender.send_blocking(v).unwrap());
            ctx.device().poll(wgpu::Maintain::wait()).panic_on_timeout();
            receiver.recv().await
        };
        #[cfg(target_arch = "wasm32")]
        let status = {
            let (sender, receiver) = async_channel::bounded(1);
            buffer_slice.map_async(mode, move |v| {
                let _ = sender.force_send(v).unwrap();
            });
            ctx.device().poll(wgpu::Maintain::wait()).panic_on_timeout();
            receiver.recv().await
        };

        status.map_err(|_| PipelineError::MapInterrupted)??;

        // A completed wait means everything submitted before it is done.
        ctx.observe_completed(snapshot);
        self.track.set_mapped(true);
        Ok(())
    }

    /// Maps the buffer for CPU reads and suspends until the device
    /// signals the mapping is ready.
    ///
    /// Requires `MAP_READ` usage. The returned region must be released
    /// with [`MappedRegion::unmap`] (or dropped, then [`Self::unmap`])
    /// before the buffer can be used again.
    pub async fn map_read(&self, ctx: &GpuContext) -> Result<MappedRegion<'_>, PipelineError> {
        self.require_usage(BufferUsages::MAP_READ)?;
        if self.track.is_mapped() {
            return Err(ConfigurationError::AlreadyMapped.into());
        }

        self.wait_mapped(ctx, wgpu::MapMode::Read).await?;
        Ok(MappedRegion {
            buffer: self,
            view: self.buffer.slice(..).get_mapped_range(),
        })
    }

    /// Maps the buffer for CPU writes.
    ///
    /// Requires `MAP_WRITE` usage. Unlike [`Self::map_read`], this fails
    /// fast with [`ConfigurationError::InFlight`] when a submitted
    /// sequence referencing the buffer has not been observed complete;
    /// reading back a result (or [`GpuContext::wait_idle`]) is the
    /// sanctioned way to wait.
    pub async fn map_write(&self, ctx: &GpuContext) -> Result<MappedRegionMut<'_>, PipelineError> {
        self.require_usage(BufferUsages::MAP_WRITE)?;
        if self.track.is_mapped() {
            return Err(ConfigurationError::AlreadyMapped.into());
        }
        if self.track.last_submission() > ctx.completed_count() {
            return Err(ConfigurationError::InFlight.into());
        }

        self.wait_mapped(ctx, wgpu::MapMode::Write).await?;
        Ok(MappedRegionMut {
            buffer: self,
            view: self.buffer.slice(..).get_mapped_range_mut(),
        })
    }

    /// Unmaps the buffer.
    ///
    /// Any [`MappedRegion`] or [`MappedRegionMut`] over it must have been
    /// dropped first. Fails with [`ConfigurationError::NotMapped`] if the
    /// buffer isn’t mapped.
    pub fn unmap(&self) -> Result<(), ConfigurationError> {
        if !self.track.is_mapped() {
            return Err(ConfigurationError::NotMapped);
        }
        self.buffer.unmap();
        self.track.set_mapped(false);
        Ok(())
    }

    /// Reads the buffer’s whole content into a vector (map, copy, unmap).
    pub async fn read(&self, ctx: &GpuContext) -> Result<Vec<u8>, PipelineError> {
        let region = self.map_read(ctx).await?;
        let bytes = region.to_vec();
        region.unmap();
        Ok(bytes)
    }

    /// Reads the buffer’s content as a vector of `T`.
    pub async fn read_pod<T: Pod>(&self, ctx: &GpuContext) -> Result<Vec<T>, PipelineError> {
        let region = self.map_read(ctx).await?;
        let result = bytemuck::try_cast_slice(&region)
            .map_err(ConfigurationError::Cast)?
            .to_vec();
        region.unmap();
        Ok(result)
    }

    /// Writes `contents` to the beginning of the buffer (map, copy, unmap).
    ///
    /// Contents longer than the buffer fail with
    /// [`ConfigurationError::CopyOutOfBounds`] before anything is mapped.
    pub async fn write(&self, ctx: &GpuContext, contents: &[u8]) -> Result<(), PipelineError> {
        if contents.len() as u64 > self.size {
            return Err(ConfigurationError::CopyOutOfBounds {
                offset: 0,
                len: contents.len() as u64,
                size: self.size,
            }
            .into());
        }

        let mut region = self.map_write(ctx).await?;
        region[..contents.len()].copy_from_slice(contents);
        region.unmap();
        Ok(())
    }
}

/// A CPU-visible read view over a mapped buffer’s bytes.
///
/// Valid only until [`Self::unmap`]; accessing the buffer from the device
/// while a region exists is a usage error the pipeline rejects.
pub struct MappedRegion<'a> {
    buffer: &'a GpuBuffer,
    view: BufferView<'a>,
}

impl MappedRegion<'_> {
    /// Releases the view and unmaps the buffer.
    pub fn unmap(self) {
        let Self { buffer, view } = self;
        drop(view);
        buffer.buffer.unmap();
        buffer.track.set_mapped(false);
    }
}

impl Deref for MappedRegion<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.view
    }
}

/// A CPU-visible write view over a mapped buffer’s bytes.
pub struct MappedRegionMut<'a> {
    buffer: &'a GpuBuffer,
    view: BufferViewMut<'a>,
}

impl MappedRegionMut<'_> {
    /// Releases the view and unmaps the buffer.
    pub fn unmap(self) {
        let Self { buffer, view } = self;
        drop(view);
        buffer.buffer.unmap();
        buffer.track.set_mapped(false);
    }
}

impl Deref for MappedRegionMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.view
    }
}

impl DerefMut for MappedRegionMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.view
    }
}

#[cfg(test)]
mod test {
    use super::{padded_init_size, validate_usage, GpuBuffer};
    use crate::error::{ConfigurationError, PipelineError};
    use crate::gpu::GpuContext;
    use wgpu::BufferUsages;

    #[test]
    fn init_size_is_padded_to_4_bytes() {
        assert_eq!(padded_init_size(0), 4);
        assert_eq!(padded_init_size(1), 4);
        assert_eq!(padded_init_size(4), 4);
        assert_eq!(padded_init_size(5), 8);
        assert_eq!(padded_init_size(16), 16);
        assert_eq!(padded_init_size(17), 20);
    }

    #[test]
    fn map_usages_only_pair_with_their_copy_usage() {
        assert!(validate_usage(BufferUsages::MAP_READ | BufferUsages::COPY_DST).is_ok());
        assert!(validate_usage(BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC).is_ok());
        assert!(validate_usage(BufferUsages::STORAGE | BufferUsages::COPY_SRC).is_ok());

        assert!(matches!(
            validate_usage(BufferUsages::MAP_READ | BufferUsages::STORAGE),
            Err(ConfigurationError::ForbiddenUsage(_))
        ));
        assert!(matches!(
            validate_usage(BufferUsages::MAP_WRITE | BufferUsages::COPY_DST),
            Err(ConfigurationError::ForbiddenUsage(_))
        ));
        assert!(matches!(
            validate_usage(BufferUsages::MAP_READ | BufferUsages::MAP_WRITE),
            Err(ConfigurationError::ForbiddenUsage(_))
        ));
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn init_contents_round_trip() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let contents = [7u8, 11, 13];
        let buffer = GpuBuffer::init(
            &gpu,
            &contents,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )
        .unwrap();
        assert_eq!(buffer.size(), 4);

        let bytes = buffer.read(&gpu).await.unwrap();
        assert_eq!(&bytes[..contents.len()], &contents);
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn double_map_and_double_unmap_are_rejected() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let buffer = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )
        .unwrap();

        let region = buffer.map_read(&gpu).await.unwrap();
        assert!(matches!(
            buffer.map_read(&gpu).await,
            Err(PipelineError::Configuration(
                ConfigurationError::AlreadyMapped
            ))
        ));
        region.unmap();

        assert!(matches!(
            buffer.unmap(),
            Err(ConfigurationError::NotMapped)
        ));
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn oversized_write_fails_fast() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let buffer = GpuBuffer::uninit(
            &gpu,
            4,
            BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
        )
        .unwrap();

        assert!(matches!(
            buffer.write(&gpu, &[0; 8]).await,
            Err(PipelineError::Configuration(
                ConfigurationError::CopyOutOfBounds { .. }
            ))
        ));
        // The failed write must leave the buffer unmapped and usable.
        assert!(!buffer.is_mapped());
        buffer.write(&gpu, &[0; 4]).await.unwrap();
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn mapping_requires_the_matching_usage() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };

        let buffer = GpuBuffer::uninit(&gpu, 4, BufferUsages::STORAGE).unwrap();
        assert!(matches!(
            buffer.map_read(&gpu).await,
            Err(PipelineError::Configuration(
                ConfigurationError::MissingUsage { .. }
            ))
        ));
    }
}
