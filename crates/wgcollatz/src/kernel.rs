//! The Collatz iteration-counting kernel.

use wgpu::BufferUsages;
use wgsubmit::{
    CommandSequence, ComputeStage, ConfigurationError, GpuBuffer, GpuContext, PipelineError,
    ShaderModule,
};

/// Value the kernel writes when the Collatz step `3n + 1` would overflow
/// 32 bits.
///
/// This is a fixed protocol value of the kernel, surfaced unmodified
/// through readback; callers must treat it as "no finite result", never
/// as a step count.
pub const OVERFLOW: u32 = u32::MAX;

/// Kernel computing, in place, the number of Collatz steps of each `u32`
/// of a storage buffer. One workgroup handles one element.
pub struct WgCollatz {
    stage: ComputeStage,
}

impl WgCollatz {
    /// The kernel’s WGSL sources.
    pub const SRC: &'static str = include_str!("collatz.wgsl");
    /// Label used in compile diagnostics.
    pub const FILE_PATH: &'static str = "wgcollatz/src/collatz.wgsl";

    /// Compiles the kernel on the given context.
    pub fn new(ctx: &GpuContext) -> Result<Self, PipelineError> {
        let module = ShaderModule::compile(ctx, Self::SRC, Self::FILE_PATH)?;
        let stage = ComputeStage::new(ctx, &module, "main")?;
        Ok(Self { stage })
    }

    /// Appends one dispatch of this kernel over the first `len` values of
    /// `values` to `sequence`.
    ///
    /// `values` needs `STORAGE` usage. A zero `len` appends nothing.
    pub fn queue(
        &self,
        ctx: &GpuContext,
        sequence: &mut CommandSequence,
        values: &GpuBuffer,
        len: u32,
    ) -> Result<(), ConfigurationError> {
        let bind_group = self.stage.bind0(ctx, [values])?;
        sequence.insert_debug_marker("compute collatz iterations")?;
        sequence.dispatch_compute(&self.stage, &bind_group, len)
    }

    /// One-shot convenience: uploads `numbers`, runs the kernel, reads
    /// the step counts back.
    ///
    /// An empty input is a no-op yielding an empty vector, without
    /// touching the device queue.
    pub async fn run(&self, ctx: &GpuContext, numbers: &[u32]) -> Result<Vec<u32>, PipelineError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let size = std::mem::size_of_val(numbers) as u64;
        let storage = GpuBuffer::init_pod(
            ctx,
            numbers,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        )?;
        let staging = GpuBuffer::uninit(
            ctx,
            size,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )?;

        let mut sequence = CommandSequence::new(ctx);
        self.queue(ctx, &mut sequence, &storage, numbers.len() as u32)?;
        sequence.copy_buffer_to_buffer(&storage, 0, &staging, 0, size)?;
        ctx.submit(sequence.seal()?)?;

        staging.read_pod(ctx).await
    }
}

/// CPU reference of the kernel: Collatz step count of `n`, or
/// [`OVERFLOW`] when `3n + 1` would overflow 32 bits.
pub fn collatz_steps(mut n: u32) -> u32 {
    let mut i = 0;
    while n > 1 {
        if n % 2 == 0 {
            n /= 2;
        } else {
            if n >= 0x5555_5555 {
                return OVERFLOW;
            }
            n = 3 * n + 1;
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod test {
    use super::{collatz_steps, WgCollatz, OVERFLOW};
    use wgsubmit::GpuContext;

    #[test]
    fn cpu_reference_counts_steps() {
        assert_eq!(collatz_steps(0), 0);
        assert_eq!(collatz_steps(1), 0);
        assert_eq!(collatz_steps(2), 1);
        assert_eq!(collatz_steps(3), 7);
        assert_eq!(collatz_steps(4), 2);
        assert_eq!(collatz_steps(6), 8);
        assert_eq!(collatz_steps(27), 111);
    }

    #[test]
    fn cpu_reference_flags_overflow() {
        assert_eq!(collatz_steps(0x5555_5555), OVERFLOW);
        assert_eq!(collatz_steps(u32::MAX), OVERFLOW);
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn gpu_matches_cpu_reference() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };
        let kernel = WgCollatz::new(&gpu).unwrap();

        let numbers = [1u32, 4, 3, 295];
        let steps = kernel.run(&gpu, &numbers).await.unwrap();

        assert_eq!(steps.len(), numbers.len());
        for (&n, &got) in numbers.iter().zip(steps.iter()) {
            assert_eq!(got, collatz_steps(n));
        }
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn gpu_surfaces_the_overflow_sentinel() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };
        let kernel = WgCollatz::new(&gpu).unwrap();

        let steps = kernel.run(&gpu, &[0x5555_5555, 2]).await.unwrap();
        assert_eq!(steps, vec![OVERFLOW, 1]);
    }

    #[futures_test::test]
    #[serial_test::serial]
    async fn empty_input_is_a_no_op() {
        let Ok(gpu) = GpuContext::new().await else {
            eprintln!("no gpu adapter, skipping");
            return;
        };
        let kernel = WgCollatz::new(&gpu).unwrap();

        assert_eq!(kernel.run(&gpu, &[]).await.unwrap(), Vec::<u32>::new());
    }
}
