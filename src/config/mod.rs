//! Pool configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations use humantime syntax (`"5s"`, `"250ms"`).

pub mod loader;

pub use loader::ENV_PREFIX;

use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What happens to a task whose worker process dies while running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deliver `WorkerDied` at the task's position and end the batch.
    #[default]
    FailBatch,
    /// Run the task again on another worker, up to `max_attempts` runs in
    /// total, then fail the batch.
    Redispatch { max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker processes kept alive
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Retire and replace a worker after this many tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tasks_per_worker: Option<usize>,

    /// How long a worker waits for the manager to answer a report
    #[serde(default = "default_handoff_timeout", with = "humantime_serde")]
    pub handoff_timeout: Duration,

    /// How long a retiring worker may take to exit before it is killed
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Executable to launch as a worker; the current executable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_args: Vec<String>,
}

fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_handoff_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(2)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            max_tasks_per_worker: None,
            handoff_timeout: default_handoff_timeout(),
            shutdown_grace: default_shutdown_grace(),
            failure_policy: FailurePolicy::default(),
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn with_processes(mut self, processes: usize) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_max_tasks_per_worker(mut self, limit: usize) -> Self {
        self.max_tasks_per_worker = Some(limit);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 {
            return Err(PoolError::invalid_config("processes", "must be at least 1"));
        }
        if self.max_tasks_per_worker == Some(0) {
            return Err(PoolError::invalid_config(
                "max_tasks_per_worker",
                "must be at least 1 when set",
            ));
        }
        if self.handoff_timeout.is_zero() {
            return Err(PoolError::invalid_config(
                "handoff_timeout",
                "must be greater than zero",
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(PoolError::invalid_config(
                "shutdown_grace",
                "must be greater than zero",
            ));
        }
        if let FailurePolicy::Redispatch { max_attempts: 0 } = self.failure_policy {
            return Err(PoolError::invalid_config(
                "failure_policy.max_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
