//! Wire protocol between the pool and its worker processes.
//!
//! Messages are JSON-serialized and newline-delimited. Each worker process
//! reads [`ManagerMessage`]s on stdin and writes [`WorkerMessage`]s on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from the pool to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Run a registered function on one argument.
    Task {
        /// Position of the argument in the caller's input sequence
        index: usize,
        /// Registered name of the task function
        function: String,
        /// Serialized argument
        argument: Value,
    },

    /// No more work for this worker; exit cleanly.
    Shutdown,
}

/// Message from a worker to the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker has no result yet and wants a task.
    Ready,

    /// Task completed successfully.
    Result {
        index: usize,
        /// Serialized return value
        value: Value,
    },

    /// Task function returned an error or panicked.
    Failed { index: usize, message: String },
}

impl ManagerMessage {
    pub fn task(index: usize, function: impl Into<String>, argument: Value) -> Self {
        Self::Task {
            index,
            function: function.into(),
            argument,
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl WorkerMessage {
    pub fn failed(index: usize, message: impl Into<String>) -> Self {
        Self::Failed {
            index,
            message: message.into(),
        }
    }

    /// Index of the task this message completes, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Ready => None,
            Self::Result { index, .. } | Self::Failed { index, .. } => Some(*index),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
