//! Command routing and execution
//!
//! This module handles routing CLI commands to their respective implementations.

use crate::app::AppConfig;
use crate::cli::args::Commands;
use crate::cli::commands::{run_factorial_command, run_sleeper_command};
use anyhow::Result;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, app: &AppConfig) -> Result<()> {
    match command {
        Commands::Factorial { pool, numbers } => run_factorial_command(app, &pool, numbers).await,
        Commands::Sleeper {
            pool,
            unit_ms,
            values,
        } => run_sleeper_command(app, &pool, unit_ms, values).await,
    }
}
