use anyhow::Result;

use super::{print_in_order, start_pool};
use crate::app::AppConfig;
use crate::cli::args::PoolArgs;
use crate::demo::Factorial;

/// Print `n! = value` for every input, in input order.
pub async fn run_factorial_command(
    app: &AppConfig,
    pool_args: &PoolArgs,
    numbers: Vec<u64>,
) -> Result<()> {
    let mut pool = start_pool(app, pool_args).await?;

    let results = pool.map(&Factorial, numbers.iter().copied());
    let outcome = print_in_order(results, &numbers, |n, value| format!("{}! = {}", n, value)).await;

    pool.shutdown().await?;
    outcome
}
