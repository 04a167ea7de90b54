//! Upload a list of integers, count their Collatz steps on the gpu, read
//! the results back. Pass the list as a comma-separated argument:
//!
//! ```text
//! cargo run --example collatz -- "1, 4, 3, 295"
//! ```

use wgcollatz::{parse_numbers, WgCollatz, OVERFLOW};
use wgsubmit::GpuContext;

const DEFAULT_INPUT: &str = "1, 4, 3, 295";

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    let input = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_INPUT.to_string());
    let numbers = parse_numbers(&input);
    println!("Input values: {numbers:?}");

    // Gpu unavailability is a user-visible condition, not a crash.
    let gpu = match GpuContext::new().await {
        Ok(gpu) => gpu,
        Err(err) => {
            println!("Failed to acquire a gpu: {err}");
            return Ok(());
        }
    };

    let kernel = WgCollatz::new(&gpu)?;
    println!("Compiled shader source to compute stage");

    let steps = kernel.run(&gpu, &numbers).await?;
    let display: Vec<String> = steps
        .iter()
        .map(|&n| {
            if n == OVERFLOW {
                "overflow".to_string()
            } else {
                n.to_string()
            }
        })
        .collect();
    println!("Received values from compute shader: {display:?}");

    Ok(())
}
