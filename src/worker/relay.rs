//! Manager-side stand-in for one worker process.
//!
//! The relay owns the worker's pipes. It performs the worker's half of every
//! channel exchange, forwards tasks to the process and carries results back.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::WorkerId;
use crate::channel::{ExchangeError, Handoff, Report, Task, WorkerEnd};
use crate::protocol::{ManagerMessage, WorkerMessage};
use crate::subprocess::{Termination, WorkerIo, WorkerProcess, WorkerReader, WorkerWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// No result yet; the next report is `ready`.
    Ready,
    /// Holding the channel mutex while the report goes out.
    Sending,
    /// Holding the channel mutex until the reply arrives.
    AwaitingTask,
    /// The process is running a task.
    Executing,
    /// Idle until the work generation advances.
    Parked,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RelaySettings {
    pub handoff_timeout: Duration,
    pub shutdown_grace: Duration,
}

enum Wake {
    NewWork,
    ManagerGone,
    ProcessExited,
    Unsolicited,
}

pub(crate) struct Relay {
    id: WorkerId,
    reader: WorkerReader,
    writer: WorkerWriter,
    process: Box<dyn WorkerProcess>,
    channel: WorkerEnd,
    generation: watch::Receiver<u64>,
    settings: RelaySettings,
    phase: Phase,
}

impl Relay {
    pub(crate) fn new(
        id: WorkerId,
        io: WorkerIo,
        channel: WorkerEnd,
        generation: watch::Receiver<u64>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            id,
            reader: io.reader,
            writer: io.writer,
            process: io.process,
            channel,
            generation,
            settings,
            phase: Phase::Ready,
        }
    }

    /// Drive the worker until it is retired or dies. Returns how it ended.
    pub(crate) async fn run(mut self) -> Termination {
        let termination = self.drive().await;
        self.enter(Phase::Terminated);
        debug!(worker_id = self.id, %termination, "Relay finished");
        termination
    }

    fn enter(&mut self, phase: Phase) {
        trace!(worker_id = self.id, from = ?self.phase, to = ?phase, "Relay phase change");
        self.phase = phase;
    }

    async fn drive(&mut self) -> Termination {
        match self.receive().await {
            Ok(Some(WorkerMessage::Ready)) => {}
            Ok(Some(other)) => {
                warn!(worker_id = self.id, message = ?other, "Worker did not start with ready");
                return self.kill().await;
            }
            Ok(None) => return self.reap().await,
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "Worker handshake failed");
                return self.kill().await;
            }
        }

        let mut outgoing = WorkerMessage::Ready;
        loop {
            let handoff = match self.hand_off(outgoing).await {
                Ok(handoff) => handoff,
                Err(e) => {
                    debug!(worker_id = self.id, error = %e, "No hand-off; shutting worker down");
                    return self.retire().await;
                }
            };

            match handoff {
                Handoff::Task(task) => {
                    self.enter(Phase::Executing);
                    match self.execute(&task).await {
                        Ok(reply) => outgoing = reply,
                        Err(termination) => return termination,
                    }
                }
                Handoff::Park { generation } => {
                    self.enter(Phase::Parked);
                    match self.park(generation).await {
                        Wake::NewWork => {
                            self.enter(Phase::Ready);
                            outgoing = WorkerMessage::Ready;
                        }
                        Wake::ManagerGone => return self.retire().await,
                        Wake::ProcessExited => return self.reap().await,
                        Wake::Unsolicited => {
                            warn!(worker_id = self.id, "Worker wrote output while idle");
                            return self.kill().await;
                        }
                    }
                }
                Handoff::Retire => return self.retire().await,
            }
        }
    }

    /// Report `message` to the manager and wait for its answer, all under the
    /// channel mutex.
    async fn hand_off(&mut self, message: WorkerMessage) -> Result<Handoff, ExchangeError> {
        let channel = self.channel.clone();
        let mut exchange = channel.begin().await;

        self.enter(Phase::Sending);
        exchange
            .report(Report {
                worker: self.id,
                message,
            })
            .await?;

        self.enter(Phase::AwaitingTask);
        exchange
            .await_reply(self.id, self.settings.handoff_timeout)
            .await
    }

    /// Hand one task to the process and wait for its reply.
    async fn execute(&mut self, task: &Task) -> Result<WorkerMessage, Termination> {
        let message =
            ManagerMessage::task(task.index, task.function.clone(), task.argument.clone());
        if let Err(e) = self.send(&message).await {
            debug!(worker_id = self.id, index = task.index, error = %e, "Could not write task");
            return Err(self.reap().await);
        }

        match self.receive().await {
            Ok(Some(reply)) if reply.index() == Some(task.index) => Ok(reply),
            Ok(Some(other)) => {
                warn!(
                    worker_id = self.id,
                    index = task.index,
                    message = ?other,
                    "Worker answered a different task"
                );
                Err(self.kill().await)
            }
            Ok(None) => Err(self.reap().await),
            Err(e) => {
                warn!(worker_id = self.id, index = task.index, error = %e, "Unreadable reply");
                Err(self.kill().await)
            }
        }
    }

    async fn park(&mut self, seen: u64) -> Wake {
        tokio::select! {
            changed = self.generation.wait_for(|current| *current > seen) => {
                if changed.is_ok() { Wake::NewWork } else { Wake::ManagerGone }
            }
            buffered = self.reader.fill_buf() => match buffered {
                Ok([]) | Err(_) => Wake::ProcessExited,
                Ok(_) => Wake::Unsolicited,
            },
        }
    }

    async fn send(&mut self, message: &ManagerMessage) -> io::Result<()> {
        let line = message.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<WorkerMessage>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        WorkerMessage::from_line(&line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Tell the process to exit and wait for it.
    async fn retire(&mut self) -> Termination {
        if let Err(e) = self.send(&ManagerMessage::Shutdown).await {
            debug!(worker_id = self.id, error = %e, "Could not deliver shutdown");
        }
        self.reap().await
    }

    async fn kill(&mut self) -> Termination {
        if let Err(e) = self.process.start_kill() {
            debug!(worker_id = self.id, error = %e, "Kill failed");
        }
        self.reap().await
    }

    /// Wait for the process to end, killing it once the grace period passes.
    async fn reap(&mut self) -> Termination {
        match tokio::time::timeout(self.settings.shutdown_grace, self.process.wait()).await {
            Ok(Ok(termination)) => termination,
            Ok(Err(e)) => {
                warn!(worker_id = self.id, error = %e, "Could not collect worker exit status");
                Termination::Unknown
            }
            Err(_) => {
                warn!(
                    worker_id = self.id,
                    grace = ?self.settings.shutdown_grace,
                    "Worker did not exit in time; killing"
                );
                if let Err(e) = self.process.start_kill() {
                    debug!(worker_id = self.id, error = %e, "Kill failed");
                }
                self.process.wait().await.unwrap_or(Termination::Unknown)
            }
        }
    }
}
