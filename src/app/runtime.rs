//! Runtime initialization and setup
//!
//! The binary builds its runtime by hand instead of using `#[tokio::main]`:
//! worker mode has to be entered before any runtime threads exist.

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::debug;

/// Multi-threaded runtime for the manager side of the binary.
pub fn build_runtime() -> Result<Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("procpool-runtime")
        .build()
        .context("Failed to start async runtime")?;
    debug!("Async runtime started");
    Ok(runtime)
}
