//! Launching worker processes.
//!
//! A [`Launcher`] turns a worker id into a running worker plus the two pipes
//! the pool talks to it over. [`ProcessLauncher`] re-executes a host binary;
//! [`ThreadLauncher`] hosts the worker loop on a thread.

pub mod launcher;
pub mod process;
pub mod termination;
pub mod thread;

pub use launcher::{Launcher, WorkerIo, WorkerProcess, WorkerReader, WorkerWriter};
pub use process::ProcessLauncher;
pub use termination::Termination;
pub use thread::ThreadLauncher;
