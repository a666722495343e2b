use async_trait::async_trait;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::BufReader;
use tracing::{debug, warn};

use super::launcher::{
    Launcher, WorkerIo, WorkerProcess, WorkerReader, WorkerSource, WorkerWriter,
};
use super::Termination;
use crate::worker::{self, Registry, WorkerId};

/// Runs each worker on an OS thread of the current process.
///
/// The worker loop is the same one a worker process runs; it talks over a
/// Unix socket pair instead of stdio. Used by tests and by hosts that cannot
/// re-execute themselves. A task function that exits the process takes the
/// whole host down with it.
#[derive(Clone)]
pub struct ThreadLauncher {
    registry: Arc<Registry>,
}

impl ThreadLauncher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, worker: WorkerId) -> io::Result<WorkerIo> {
        let (manager_side, worker_side) = UnixStream::pair()?;
        let control = manager_side.try_clone()?;
        let worker_reader = worker_side.try_clone()?;

        let registry = Arc::clone(&self.registry);
        let handle = std::thread::Builder::new()
            .name(format!("procpool-worker-{}", worker))
            .spawn(move || {
                match worker::serve(&registry, io::BufReader::new(worker_reader), worker_side) {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!(worker_id = worker, error = %e, "Worker thread stopped on I/O error");
                        1
                    }
                }
            })?;

        manager_side.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(manager_side)?;
        let (read_half, write_half) = stream.into_split();

        debug!(worker_id = worker, "Spawned worker thread");

        let reader: WorkerReader = BufReader::new(Box::new(read_half) as WorkerSource);
        let writer: WorkerWriter = Box::new(write_half);
        Ok(WorkerIo {
            reader,
            writer,
            process: Box::new(ThreadProcess {
                handle: Some(handle),
                control,
                termination: None,
            }),
        })
    }
}

struct ThreadProcess {
    handle: Option<JoinHandle<i32>>,
    /// Closing this socket makes the worker loop see end-of-file.
    control: UnixStream,
    termination: Option<Termination>,
}

#[async_trait]
impl WorkerProcess for ThreadProcess {
    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    async fn wait(&mut self) -> io::Result<Termination> {
        if let Some(termination) = self.termination {
            return Ok(termination);
        }
        let Some(handle) = self.handle.take() else {
            return Ok(Termination::Unknown);
        };
        let joined = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(io::Error::other)?;
        let termination = match joined {
            Ok(code) => Termination::Exited(code),
            Err(_) => Termination::Unknown,
        };
        self.termination = Some(termination);
        Ok(termination)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        match self.control.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
