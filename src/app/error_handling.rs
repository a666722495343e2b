//! Error handling utilities
//!
//! This module provides centralized error handling for the application.

use crate::error::PoolError;
use tracing::error;

/// Handle fatal errors and exit with appropriate status code
///
/// A [`PoolError`] anywhere in the chain decides the exit code; anything else
/// exits with 1. With `verbose >= 1` the full error chain is printed.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    eprintln!("Error: {:#}", error);
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}

/// Exit code for an application error.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PoolError>())
        .map(PoolError::exit_code)
        .unwrap_or(1)
}
