//! Application configuration
//!
//! Settings of the `procpool` binary itself, and how it arrives at the
//! [`PoolConfig`] it runs with.

use crate::config::PoolConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Pool configuration file given on the command line
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,mio=debug",
        }
    }

    /// Pool settings from the config file if one was given, otherwise from
    /// defaults. `PROCPOOL_*` variables apply either way.
    pub async fn pool_config(&self) -> Result<PoolConfig> {
        match &self.config_path {
            Some(path) => PoolConfig::load(path)
                .await
                .with_context(|| format!("Failed to load {}", path.display())),
            None => {
                let mut config = PoolConfig::default();
                config.merge_env_vars()?;
                Ok(config)
            }
        }
    }
}
