use anyhow::Result;
use tracing::info;

use super::{print_in_order, start_pool};
use crate::app::AppConfig;
use crate::cli::args::PoolArgs;
use crate::demo::{Nap, SleepEcho};

/// Echo every value after `value * unit_ms` milliseconds.
///
/// Output order is input order even though short sleeps finish first.
pub async fn run_sleeper_command(
    app: &AppConfig,
    pool_args: &PoolArgs,
    unit_ms: u64,
    values: Vec<u64>,
) -> Result<()> {
    let mut pool = start_pool(app, pool_args).await?;
    info!(values = values.len(), unit_ms, "Echoing values");

    let naps = values.iter().map(|&value| Nap { value, unit_ms });
    let results = pool.map(&SleepEcho, naps);
    let outcome = print_in_order(results, &values, |_, value| value.to_string()).await;

    pool.shutdown().await?;
    outcome
}
