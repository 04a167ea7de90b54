#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod buffer;
pub mod cache;
pub mod encoder;
pub mod error;
pub mod gpu;
pub mod shader;

pub use buffer::{GpuBuffer, MappedRegion, MappedRegionMut};
pub use cache::StageCache;
pub use encoder::{CommandSequence, SealedSequence, WorkgroupSize};
pub use error::{CompileError, ConfigurationError, PipelineError, UnavailableError};
pub use gpu::{GpuContext, SubmissionIndex};
pub use shader::{BindGroup, BindingInfo, BindingKind, ComputeStage, ShaderModule};

/// Third-party modules re-exports.
pub mod re_exports {
    pub use bytemuck;
    pub use naga_oil;
    pub use wgpu;
}
