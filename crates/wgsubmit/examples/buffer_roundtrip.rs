//! CPU→GPU→CPU buffer round-trip: write four bytes into a CPU-mapped
//! buffer, copy them to a readable buffer on the device, read them back.

use wgpu::BufferUsages;
use wgsubmit::{CommandSequence, GpuBuffer, GpuContext};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // Gpu unavailability is a user-visible condition, not a crash.
    let gpu = match GpuContext::new().await {
        Ok(gpu) => gpu,
        Err(err) => {
            println!("Failed to acquire a gpu: {err}");
            return Ok(());
        }
    };

    let data = [0u8, 1, 2, 3];
    println!("Filling CPU buffer with values {data:?}");
    let write_buffer = GpuBuffer::uninit(
        &gpu,
        data.len() as u64,
        BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
    )?;
    write_buffer.write(&gpu, &data).await?;

    let read_buffer = GpuBuffer::uninit(
        &gpu,
        data.len() as u64,
        BufferUsages::COPY_DST | BufferUsages::MAP_READ,
    )?;

    println!("Enqueuing copy command to transfer data from CPU buffer to gpu buffer");
    let mut sequence = CommandSequence::new(&gpu);
    sequence.copy_buffer_to_buffer(&write_buffer, 0, &read_buffer, 0, data.len() as u64)?;
    let sealed = sequence.seal()?;

    println!("Submitting copy command to device queue");
    gpu.submit(sealed)?;

    let readback = read_buffer.read(&gpu).await?;
    println!("Received data from gpu: {readback:?}");
    assert_eq!(readback, data);

    Ok(())
}
