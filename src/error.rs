use crate::subprocess::Termination;
use crate::worker::WorkerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {field} {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Failed to launch worker {worker}: {source}")]
    Launch {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("Task {index} failed: {message}")]
    Task { index: usize, message: String },

    #[error("Worker {worker} died while running task {index}: {termination}")]
    WorkerDied {
        worker: WorkerId,
        index: usize,
        termination: Termination,
    },

    #[error("Failed to encode argument for task {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode result of task {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Worker pool is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file error: {0}")]
    Config(#[from] toml::de::Error),
}

impl PoolError {
    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        PoolError::InvalidConfiguration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Index of the task this error belongs to, if it is task-scoped.
    pub fn task_index(&self) -> Option<usize> {
        match self {
            PoolError::Task { index, .. }
            | PoolError::WorkerDied { index, .. }
            | PoolError::Encode { index, .. }
            | PoolError::Decode { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Process exit code the binary uses for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PoolError::InvalidConfiguration { .. } | PoolError::Config(_) => 2,
            PoolError::Launch { .. } => 3,
            PoolError::Task { .. } | PoolError::Encode { .. } | PoolError::Decode { .. } => 4,
            PoolError::WorkerDied { .. } => 5,
            PoolError::Protocol(_) | PoolError::Closed | PoolError::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
