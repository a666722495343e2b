use super::PoolConfig;
use crate::error::{PoolError, Result};
use humantime_serde::re::humantime;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "PROCPOOL_";

impl PoolConfig {
    /// Load a TOML file, apply `PROCPOOL_*` overrides, and validate.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let mut config = Self::from_toml(&content)?;
        config.merge_env_vars()?;
        config.validate()?;
        debug!(path = %path.display(), processes = config.processes, "Loaded pool configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by full variable name.
    pub fn merge_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("PROCESSES") {
            self.processes = parse_number("processes", &value)?;
        }

        if let Some(value) = var("MAX_TASKS_PER_WORKER") {
            self.max_tasks_per_worker = match value.trim() {
                "" | "none" => None,
                limit => Some(parse_number("max_tasks_per_worker", limit)?),
            };
        }

        if let Some(value) = var("HANDOFF_TIMEOUT") {
            self.handoff_timeout = parse_duration("handoff_timeout", &value)?;
        }

        if let Some(value) = var("SHUTDOWN_GRACE") {
            self.shutdown_grace = parse_duration("shutdown_grace", &value)?;
        }

        if let Some(program) = var("WORKER_PROGRAM") {
            self.worker_program = Some(PathBuf::from(program));
        }

        Ok(())
    }
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PoolError::invalid_config(field, format!("'{}': {}", value, e)))
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| PoolError::invalid_config(field, format!("'{}': {}", value, e)))
}
