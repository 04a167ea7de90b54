//! Building and sealing ordered sequences of gpu operations.

use crate::buffer::{BufferTrack, GpuBuffer};
use crate::error::ConfigurationError;
use crate::gpu::GpuContext;
use crate::shader::{BindGroup, ComputeStage};
use std::sync::Arc;
use wgpu::{BufferUsages, CommandBuffer, CommandEncoder, COPY_BUFFER_ALIGNMENT};

/// Trait implemented for workgroup counts in compute dispatches.
///
/// Lets callers pass either a single `u32` or a full `[u32; 3]` count to
/// [`CommandSequence::dispatch_compute`].
pub trait WorkgroupSize {
    /// Converts `self` into the three-dimensional workgroup count.
    fn into_workgroups_size(self) -> [u32; 3];
}

impl WorkgroupSize for u32 {
    fn into_workgroups_size(self) -> [u32; 3] {
        [self, 1, 1]
    }
}

impl WorkgroupSize for [u32; 3] {
    fn into_workgroups_size(self) -> [u32; 3] {
        self
    }
}

// A dispatch is empty when any dimension is zero. Checked per component:
// the product of three in-limit counts can exceed `u32`.
fn is_empty_dispatch(workgroups: [u32; 3]) -> bool {
    workgroups.contains(&0)
}

/// An ordered sequence of gpu operations under construction.
///
/// Operations execute on the device in the exact order they were
/// appended; the sequence introduces no reordering of its own. Once
/// [`Self::seal`]ed, no further operations may be appended.
pub struct CommandSequence {
    // None once sealed.
    encoder: Option<CommandEncoder>,
    tracks: Vec<Arc<BufferTrack>>,
}

impl CommandSequence {
    /// Starts an empty sequence.
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            encoder: Some(ctx.device().create_command_encoder(&Default::default())),
            tracks: Vec::new(),
        }
    }

    fn encoder(&mut self) -> Result<&mut CommandEncoder, ConfigurationError> {
        self.encoder.as_mut().ok_or(ConfigurationError::Sealed)
    }

    /// Appends a copy of `size` bytes from `src` to `dst`.
    ///
    /// Offsets and size must be 4-byte aligned and in bounds; the source
    /// needs `COPY_SRC`, the destination `COPY_DST`, and the two must be
    /// distinct, unmapped buffers.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &GpuBuffer,
        src_offset: u64,
        dst: &GpuBuffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), ConfigurationError> {
        if self.encoder.is_none() {
            return Err(ConfigurationError::Sealed);
        }
        src.require_usage(BufferUsages::COPY_SRC)?;
        dst.require_usage(BufferUsages::COPY_DST)?;
        for value in [src_offset, dst_offset, size] {
            if value % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(ConfigurationError::CopyMisaligned(value));
            }
        }
        for (offset, buffer) in [(src_offset, src), (dst_offset, dst)] {
            if offset + size > buffer.size() {
                return Err(ConfigurationError::CopyOutOfBounds {
                    offset,
                    len: size,
                    size: buffer.size(),
                });
            }
            if buffer.is_mapped() {
                return Err(ConfigurationError::MappedInUse);
            }
        }
        let (src_track, dst_track) = (src.track(), dst.track());
        if Arc::ptr_eq(&src_track, &dst_track) {
            return Err(ConfigurationError::CopyOverlap);
        }

        self.encoder()?.copy_buffer_to_buffer(
            src.buffer(),
            src_offset,
            dst.buffer(),
            dst_offset,
            size,
        );
        self.tracks.push(src_track);
        self.tracks.push(dst_track);
        Ok(())
    }

    /// Appends a compute dispatch of `stage` over `bind_group` with the
    /// given workgroup count.
    ///
    /// A zero workgroup count encodes nothing (an explicit no-op).
    pub fn dispatch_compute(
        &mut self,
        stage: &ComputeStage,
        bind_group: &BindGroup,
        workgroups: impl WorkgroupSize,
    ) -> Result<(), ConfigurationError> {
        let workgroups = workgroups.into_workgroups_size();
        let encoder = self.encoder()?;
        if is_empty_dispatch(workgroups) {
            return Ok(());
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(stage.pipeline());
            pass.set_bind_group(bind_group.group(), bind_group.raw(), &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.tracks.extend(bind_group.tracks().iter().cloned());
        Ok(())
    }

    /// Appends a debug marker visible to gpu debugging tools.
    pub fn insert_debug_marker(&mut self, label: &str) -> Result<(), ConfigurationError> {
        self.encoder()?.insert_debug_marker(label);
        Ok(())
    }

    /// Seals the sequence into an immutable, submittable unit.
    ///
    /// Sealing twice, like appending after sealing, is a
    /// [`ConfigurationError::Sealed`].
    pub fn seal(&mut self) -> Result<SealedSequence, ConfigurationError> {
        let encoder = self.encoder.take().ok_or(ConfigurationError::Sealed)?;
        Ok(SealedSequence {
            commands: encoder.finish(),
            tracks: std::mem::take(&mut self.tracks),
        })
    }
}

/// A sealed command sequence: an immutable value consumed by exactly one
/// [`GpuContext::submit`].
///
/// Re-submission of the same unit is unrepresentable; encode a fresh
/// sequence to execute the same operations again.
pub struct SealedSequence {
    commands: CommandBuffer,
    tracks: Vec<Arc<BufferTrack>>,
}

impl SealedSequence {
    pub(crate) fn into_parts(self) -> (CommandBuffer, Vec<Arc<BufferTrack>>) {
        (self.commands, self.tracks)
    }
}
