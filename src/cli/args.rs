//! CLI argument structures
//!
//! This module defines the command-line interface of the `procpool` demo
//! binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Map demo functions over inputs with a pool of worker processes
#[derive(Parser)]
#[command(name = "procpool")]
#[command(about = "procpool - map functions over inputs with a fixed pool of worker processes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Pool configuration file (TOML)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Pool settings that override the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct PoolArgs {
    /// Number of worker processes
    #[arg(short = 'p', long)]
    pub processes: Option<usize>,

    /// Replace each worker after this many tasks
    #[arg(long, value_name = "K")]
    pub max_tasks: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print n! for every n, in input order
    #[command(name = "factorial")]
    Factorial {
        #[command(flatten)]
        pool: PoolArgs,

        /// Numbers to compute factorials of
        #[arg(required = true)]
        numbers: Vec<u64>,
    },

    /// Echo every value after sleeping proportionally to it
    #[command(name = "sleeper")]
    Sleeper {
        #[command(flatten)]
        pool: PoolArgs,

        /// Milliseconds slept per unit of value
        #[arg(long, default_value = "100", value_name = "MS")]
        unit_ms: u64,

        /// Values to echo
        #[arg(required = true)]
        values: Vec<u64>,
    },
}
