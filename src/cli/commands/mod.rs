//! Command implementation modules
//!
//! Each demo command starts a pool of re-executed `procpool` processes, maps
//! one demo function and prints the results in input order.

pub mod factorial;
pub mod sleeper;

pub use factorial::run_factorial_command;
pub use sleeper::run_sleeper_command;

use crate::app::AppConfig;
use crate::cli::args::PoolArgs;
use crate::error::PoolError;
use crate::pool::{MapStream, Pool};
use anyhow::{Context, Result};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use tracing::debug;

/// Start a process pool from the application config plus CLI overrides.
pub(crate) async fn start_pool(app: &AppConfig, args: &PoolArgs) -> Result<Pool> {
    let mut config = app.pool_config().await?;
    if let Some(processes) = args.processes {
        config.processes = processes;
    }
    if let Some(limit) = args.max_tasks {
        config.max_tasks_per_worker = Some(limit);
    }
    debug!(?config, "Starting worker pool");

    Pool::new(config).context("Failed to start worker pool")
}

/// Print results to stdout as they come in.
///
/// A failed task is reported on stderr and the rest still print; the first
/// such failure is returned at the end. Any other error stops the output.
pub(crate) async fn print_in_order<R, T>(
    mut results: MapStream<'_, R>,
    inputs: &[T],
    render: impl Fn(&T, R) -> String,
) -> Result<()>
where
    R: DeserializeOwned,
    T: Display,
{
    let mut failures = 0usize;
    let mut first_failure = None;

    for input in inputs {
        let Some(result) = results.next().await else {
            break;
        };
        match result {
            Ok(value) => println!("{}", render(input, value)),
            Err(e @ PoolError::Task { .. }) => {
                eprintln!("{}: {}", input, e);
                failures += 1;
                first_failure.get_or_insert(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    match first_failure {
        Some(e) => Err(anyhow::Error::new(e)
            .context(format!("{} of {} inputs failed", failures, inputs.len()))),
        None => Ok(()),
    }
}
