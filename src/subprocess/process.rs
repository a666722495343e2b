use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tracing::debug;

use super::launcher::{
    Launcher, WorkerIo, WorkerProcess, WorkerReader, WorkerSource, WorkerWriter,
};
use super::Termination;
use crate::config::PoolConfig;
use crate::worker::{WorkerId, WORKER_ID_ENV};

/// Launches workers by re-executing a host binary in worker mode.
///
/// The child's stdin/stdout carry the protocol; stderr is inherited so worker
/// logs and panics stay visible.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Use the configured worker program, or the current executable.
    pub fn from_config(config: &PoolConfig) -> io::Result<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config.worker_args.clone()))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, worker: WorkerId) -> io::Result<WorkerIo> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ID_ENV, worker.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;

        debug!(
            worker_id = worker,
            pid = child.id(),
            program = %self.program.display(),
            "Spawned worker process"
        );

        let reader: WorkerReader = BufReader::new(Box::new(stdout) as WorkerSource);
        let writer: WorkerWriter = Box::new(stdin);
        Ok(WorkerIo {
            reader,
            writer,
            process: Box::new(ChildProcess { child }),
        })
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Termination> {
        let status = self.child.wait().await?;
        Ok(Termination::from_status(status))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}
