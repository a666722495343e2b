use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::Termination;
use crate::worker::WorkerId;

pub type WorkerSource = Box<dyn AsyncRead + Send + Unpin>;
pub type WorkerReader = BufReader<WorkerSource>;
pub type WorkerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pipes and handle of one freshly launched worker.
pub struct WorkerIo {
    /// Lines written by the worker
    pub reader: WorkerReader,
    /// Lines read by the worker
    pub writer: WorkerWriter,
    pub process: Box<dyn WorkerProcess>,
}

/// Handle to a running worker, whatever hosts it.
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id, when the worker is a separate process.
    fn pid(&self) -> Option<u32>;

    /// Wait for the worker to end.
    async fn wait(&mut self) -> io::Result<Termination>;

    /// Ask the worker to stop immediately without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;
}

/// Starts workers speaking the line protocol on a pair of pipes.
///
/// Must be called from within a tokio runtime.
pub trait Launcher: Send + Sync {
    fn launch(&self, worker: WorkerId) -> io::Result<WorkerIo>;
}
