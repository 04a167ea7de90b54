//! Error taxonomy for the submission pipeline.

use bytemuck::PodCastError;
use thiserror::Error;
use wgpu::BufferUsages;

/// The gpu adapter or device could not be acquired.
///
/// This is non-retryable without an external change (enabling a driver,
/// running on different hardware). Callers should report it to the user
/// rather than treat it as a bug.
#[derive(Debug, Error)]
pub enum UnavailableError {
    /// No compatible gpu adapter was found among the requested backends.
    #[error("no compatible gpu adapter found")]
    NoAdapter,
    /// The adapter refused to open a device.
    #[error("the gpu adapter refused to open a device: {0}")]
    NoDevice(#[from] wgpu::RequestDeviceError),
}

/// A programmer error in how the pipeline was driven.
///
/// These are detected before any device call and never recovered from:
/// the caller holds a resource in a state that makes the requested
/// operation meaningless.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The requested usage flags mix CPU mapping with device-only usages
    /// the platform forbids together.
    #[error("forbidden buffer usage combination: {0:?} (MAP_READ pairs only with COPY_DST, MAP_WRITE only with COPY_SRC)")]
    ForbiddenUsage(BufferUsages),
    /// An operation was applied to a buffer whose usage flags don’t allow it.
    #[error("buffer usage {actual:?} is missing {needed:?} required by this operation")]
    MissingUsage {
        /// The usage the operation requires.
        needed: BufferUsages,
        /// The usage the buffer was created with.
        actual: BufferUsages,
    },
    /// A copy offset or size isn’t a multiple of 4 bytes.
    #[error("copy offset/size {0} is not 4-byte aligned")]
    CopyMisaligned(u64),
    /// A copy range falls outside the source or destination buffer.
    #[error("copy range {offset}..{} exceeds the buffer size {size}", .offset + .len)]
    CopyOutOfBounds {
        /// Start of the copy range, in bytes.
        offset: u64,
        /// Length of the copy range, in bytes.
        len: u64,
        /// Size of the buffer the range was applied to.
        size: u64,
    },
    /// Source and destination of a copy are the same buffer.
    #[error("copy source and destination must be distinct buffers")]
    CopyOverlap,
    /// The buffer is already mapped for CPU access.
    #[error("the buffer is already mapped")]
    AlreadyMapped,
    /// The buffer is not currently mapped.
    #[error("the buffer is not mapped")]
    NotMapped,
    /// The buffer is referenced by a submission not yet observed complete.
    #[error("the buffer is referenced by an in-flight submission; read it back or wait for idle first")]
    InFlight,
    /// The buffer is mapped while a sequence referencing it is submitted,
    /// or while an operation referencing it is appended.
    #[error("the buffer is mapped for CPU access; unmap it before using it on the device")]
    MappedInUse,
    /// An operation was appended (or `seal` called again) after `seal`.
    #[error("the command sequence is already sealed")]
    Sealed,
    /// The requested compute entry point does not exist in the shader module.
    #[error("the shader module declares no compute entry point named `{0}`")]
    UnknownEntryPoint(String),
    /// A buffer was bound to a slot the shader does not declare.
    #[error("the shader declares no binding at group {group}, binding {binding}")]
    UnknownBinding {
        /// Bind group index of the attempted binding.
        group: u32,
        /// Binding index within the group.
        binding: u32,
    },
    /// A bound buffer is smaller than the shader’s declared binding size.
    #[error("buffer of {actual} bytes bound at group {group}, binding {binding} is smaller than the shader’s declared minimum of {needed} bytes")]
    BindingTooSmall {
        /// Bind group index of the offending binding.
        group: u32,
        /// Binding index within the group.
        binding: u32,
        /// Minimum byte size the shader declares for this binding.
        needed: u64,
        /// Actual size of the bound buffer.
        actual: u64,
    },
    /// A bound buffer is empty or not 4-byte aligned.
    #[error("buffer of {0} bytes cannot be bound: bindings must be non-empty and 4-byte aligned")]
    UnbindableSize(u64),
    /// Read-back bytes could not be reinterpreted as the requested type.
    #[error(transparent)]
    Cast(#[from] PodCastError),
}

/// Shader source rejected by the platform compiler.
///
/// Carries the rendered diagnostics verbatim; the pipeline never
/// interprets shader sources beyond forwarding them.
#[derive(Debug, Error)]
#[error("shader compilation failed ({file_path}):\n{diagnostics}")]
pub struct CompileError {
    /// Label identifying the shader source, typically its file path.
    pub file_path: String,
    /// The compiler’s rendered diagnostic text.
    pub diagnostics: String,
}

/// Any error the pipeline can surface.
///
/// The pipeline performs no retries and no partial-failure recovery:
/// every error propagates to the immediate caller and the submission
/// cycle is abandoned.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Adapter or device acquisition failed.
    #[error(transparent)]
    Unavailable(#[from] UnavailableError),
    /// The pipeline was misused by the caller.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Shader compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The device reported an asynchronous mapping failure.
    #[error("buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    /// The map callback was dropped without reporting a status.
    #[error("buffer mapping was interrupted before the device reported a status")]
    MapInterrupted,
}
