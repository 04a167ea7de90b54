//! Shader compilation, reflection, and compute stage construction.

use crate::buffer::{BufferTrack, GpuBuffer};
use crate::error::{CompileError, ConfigurationError};
use crate::gpu::GpuContext;
use naga_oil::compose::{Composer, NagaModuleDescriptor};
use std::sync::Arc;
use wgpu::naga::{self, AddressSpace, ShaderStage, StorageAccess};
use wgpu::{BufferUsages, ComputePipeline, ComputePipelineDescriptor};

/// The kind of resource a shader binding expects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// A storage buffer.
    Storage {
        /// Whether the shader only reads from the binding.
        read_only: bool,
    },
    /// A uniform buffer.
    Uniform,
}

/// A buffer binding declared by a shader, reflected from its sources.
#[derive(Clone, Debug)]
pub struct BindingInfo {
    /// Bind group index.
    pub group: u32,
    /// Binding index within the group.
    pub binding: u32,
    /// Expected resource kind.
    pub kind: BindingKind,
    /// Minimum byte size of a buffer bound to this slot.
    pub min_size: u64,
}

impl BindingInfo {
    fn required_usage(&self) -> BufferUsages {
        match self.kind {
            BindingKind::Storage { .. } => BufferUsages::STORAGE,
            BindingKind::Uniform => BufferUsages::UNIFORM,
        }
    }
}

// Composes and validates WGSL sources, turning composer failures into the
// rendered diagnostic text.
fn compose(source: &str, file_path: &str) -> Result<naga::Module, CompileError> {
    let mut composer = Composer::default();
    match composer.make_naga_module(NagaModuleDescriptor {
        source,
        file_path,
        ..Default::default()
    }) {
        Ok(module) => Ok(module),
        Err(err) => Err(CompileError {
            file_path: file_path.to_string(),
            diagnostics: err.emit_to_string(&composer),
        }),
    }
}

fn reflect_bindings(module: &naga::Module) -> Vec<BindingInfo> {
    let mut bindings = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let Some(ref resource) = var.binding else {
            continue;
        };
        let kind = match var.space {
            AddressSpace::Storage { access } => BindingKind::Storage {
                read_only: !access.contains(StorageAccess::STORE),
            },
            AddressSpace::Uniform => BindingKind::Uniform,
            _ => continue,
        };
        // For runtime-sized arrays this is the size of a single element,
        // matching the platform’s minimum binding size rule.
        let min_size = module.types[var.ty].inner.size(module.to_ctx()) as u64;
        bindings.push(BindingInfo {
            group: resource.group,
            binding: resource.binding,
            kind,
            min_size,
        });
    }
    bindings.sort_by_key(|b| (b.group, b.binding));
    bindings
}

fn reflect_entry_points(module: &naga::Module) -> Vec<String> {
    module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == ShaderStage::Compute)
        .map(|ep| ep.name.clone())
        .collect()
}

/// A compiled shader: the device module plus the bindings and compute
/// entry points reflected from its sources.
///
/// Compiled once per distinct source; reusable across any number of
/// stages and submissions.
pub struct ShaderModule {
    module: wgpu::ShaderModule,
    bindings: Vec<BindingInfo>,
    entry_points: Vec<String>,
}

impl ShaderModule {
    /// Compiles WGSL `source` into a shader module.
    ///
    /// `file_path` only labels diagnostics. Malformed source fails with a
    /// [`CompileError`] carrying the compiler’s rendered output verbatim.
    pub fn compile(
        ctx: &GpuContext,
        source: &str,
        file_path: &str,
    ) -> Result<Self, CompileError> {
        let naga_module = compose(source, file_path)?;
        let bindings = reflect_bindings(&naga_module);
        let entry_points = reflect_entry_points(&naga_module);
        let module = ctx
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(file_path),
                source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(naga_module)),
            });

        Ok(Self {
            module,
            bindings,
            entry_points,
        })
    }

    /// The buffer bindings the shader declares, ordered by (group, binding).
    pub fn bindings(&self) -> &[BindingInfo] {
        &self.bindings
    }

    /// The names of the compute entry points the shader declares.
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }
}

/// A compute pipeline derived from a shader module and one of its entry
/// points, with the bind-group layout derived automatically from the
/// shader’s declared bindings.
pub struct ComputeStage {
    pipeline: ComputePipeline,
    entry_point: String,
    bindings: Vec<BindingInfo>,
}

impl ComputeStage {
    /// Builds the pipeline for `entry_point`.
    ///
    /// Fails with [`ConfigurationError::UnknownEntryPoint`] when the
    /// module declares no compute entry point of that name.
    pub fn new(
        ctx: &GpuContext,
        module: &ShaderModule,
        entry_point: &str,
    ) -> Result<Self, ConfigurationError> {
        if !module.entry_points.iter().any(|name| name == entry_point) {
            return Err(ConfigurationError::UnknownEntryPoint(
                entry_point.to_string(),
            ));
        }

        let pipeline = ctx
            .device()
            .create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: &module.module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

        Ok(Self {
            pipeline,
            entry_point: entry_point.to_string(),
            bindings: module.bindings.clone(),
        })
    }

    /// The entry point this stage dispatches.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub(crate) fn pipeline(&self) -> &ComputePipeline {
        &self.pipeline
    }

    /// Associates buffers with the shader-visible slots of bind group
    /// `group`; `entries` pairs each binding index with its buffer.
    ///
    /// Every entry is validated against the shader’s reflected bindings:
    /// unknown slots, missing `STORAGE`/`UNIFORM` usage, buffers smaller
    /// than the declared minimum, and empty or misaligned buffers all
    /// fail here rather than at submission.
    pub fn bind(
        &self,
        ctx: &GpuContext,
        group: u32,
        entries: &[(u32, &GpuBuffer)],
    ) -> Result<BindGroup, ConfigurationError> {
        let mut raw_entries = Vec::with_capacity(entries.len());
        let mut tracks = Vec::with_capacity(entries.len());

        for &(binding, buffer) in entries {
            let info = self
                .bindings
                .iter()
                .find(|info| info.group == group && info.binding == binding)
                .ok_or(ConfigurationError::UnknownBinding { group, binding })?;
            buffer.require_usage(info.required_usage())?;
            if buffer.size() == 0 || buffer.size() % 4 != 0 {
                return Err(ConfigurationError::UnbindableSize(buffer.size()));
            }
            if buffer.size() < info.min_size {
                return Err(ConfigurationError::BindingTooSmall {
                    group,
                    binding,
                    needed: info.min_size,
                    actual: buffer.size(),
                });
            }

            raw_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: buffer.buffer().as_entire_binding(),
            });
            tracks.push(buffer.track());
        }

        let layout = self.pipeline.get_bind_group_layout(group);
        let raw = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries: &raw_entries,
        });

        Ok(BindGroup { raw, group, tracks })
    }

    /// Binds `N` consecutive buffers to bindings `0..N` of bind group 0,
    /// the most common layout.
    pub fn bind0<const N: usize>(
        &self,
        ctx: &GpuContext,
        buffers: [&GpuBuffer; N],
    ) -> Result<BindGroup, ConfigurationError> {
        let entries: [(u32, &GpuBuffer); N] = std::array::from_fn(|i| (i as u32, buffers[i]));
        self.bind(ctx, 0, &entries)
    }
}

/// An association of buffers with the slots a compute stage expects,
/// validated at creation.
pub struct BindGroup {
    raw: wgpu::BindGroup,
    group: u32,
    tracks: Vec<Arc<BufferTrack>>,
}

impl BindGroup {
    pub(crate) fn raw(&self) -> &wgpu::BindGroup {
        &self.raw
    }

    pub(crate) fn group(&self) -> u32 {
        self.group
    }

    pub(crate) fn tracks(&self) -> &[Arc<BufferTrack>] {
        &self.tracks
    }
}

#[cfg(test)]
mod test {
    use super::{compose, reflect_bindings, reflect_entry_points, BindingKind};

    const TEST_SRC: &str = "
        @group(0) @binding(0) var<storage, read_write> values: array<u32>;
        @group(0) @binding(1) var<uniform> len: u32;

        @compute @workgroup_size(1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            if id.x < len {
                values[id.x] = values[id.x] * 2u;
            }
        }
    ";

    #[test]
    fn reflection_of_a_known_shader() {
        let module = compose(TEST_SRC, "test.wgsl").unwrap();

        let entry_points = reflect_entry_points(&module);
        assert_eq!(entry_points, vec!["main".to_string()]);

        let bindings = reflect_bindings(&module);
        assert_eq!(bindings.len(), 2);
        assert_eq!((bindings[0].group, bindings[0].binding), (0, 0));
        assert_eq!(bindings[0].kind, BindingKind::Storage { read_only: false });
        assert_eq!(bindings[0].min_size, 4);
        assert_eq!((bindings[1].group, bindings[1].binding), (0, 1));
        assert_eq!(bindings[1].kind, BindingKind::Uniform);
        assert_eq!(bindings[1].min_size, 4);
    }

    #[test]
    fn malformed_source_carries_diagnostics() {
        let err = compose("fn main( {", "broken.wgsl").unwrap_err();
        assert_eq!(err.file_path, "broken.wgsl");
        assert!(!err.diagnostics.is_empty());
    }
}
