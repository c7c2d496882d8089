//! bgfill CLI tool
//!
//! Replaces image backgrounds with a solid colour using the bgfill library
//! with ONNX Runtime or Tract segmentation backends.

#[cfg(feature = "cli")]
use bgfill::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
