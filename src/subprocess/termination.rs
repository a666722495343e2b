//! How a worker process ended.

use nix::sys::signal::Signal;
use std::fmt;
use std::os::unix::process::ExitStatusExt;

/// Reason a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// The process is gone but no status could be collected.
    Unknown,
}

impl Termination {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal().map(Signal::try_from) {
            Some(Ok(signal)) => Self::Signaled(signal),
            _ => Self::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(signal) => write!(f, "killed by signal {:?}", signal),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}
