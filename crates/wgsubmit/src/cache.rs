//! Caching of compiled compute stages.

use crate::error::PipelineError;
use crate::gpu::GpuContext;
use crate::shader::{ComputeStage, ShaderModule};
use dashmap::DashMap;
use std::sync::Arc;

/// A map from (shader source, entry point) to the compiled stage.
///
/// Compilation happens once per distinct source; later lookups reuse the
/// same `Arc`ed stage across submissions. Keys are the exact sources, so
/// distinct shaders can never alias to the same stage.
#[derive(Default)]
pub struct StageCache {
    stages: DashMap<(String, String), Arc<ComputeStage>>,
}

impl StageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            stages: DashMap::new(),
        }
    }

    /// Returns the cached stage for `(source, entry_point)`, compiling it
    /// on the first request.
    pub fn get_or_compile(
        &self,
        ctx: &GpuContext,
        source: &str,
        file_path: &str,
        entry_point: &str,
    ) -> Result<Arc<ComputeStage>, PipelineError> {
        let key = (source.to_string(), entry_point.to_string());

        if let Some(stage) = self.stages.get(&key) {
            return Ok(stage.clone());
        }

        let module = ShaderModule::compile(ctx, source, file_path)?;
        let stage = Arc::new(ComputeStage::new(ctx, &module, entry_point)?);
        self.stages.insert(key, stage.clone());
        Ok(stage)
    }

    /// Number of compiled stages currently held.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the cache holds no stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
