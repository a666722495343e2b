//! The worker side of the pool.
//!
//! A worker is the host binary re-executed with [`WORKER_ID_ENV`] set. It
//! announces itself with `ready`, then runs one task per `task` line until it
//! reads `shutdown` or its stdin closes.

pub mod registry;
pub(crate) mod relay;

pub use registry::{Registry, TaskFn};

use crate::protocol::{ManagerMessage, WorkerMessage};
use std::io::{self, BufRead, Write};
use tracing::{debug, trace};

/// Identifies a worker within one pool. Never reused.
pub type WorkerId = usize;

/// Environment variable that marks a process as a pool worker.
pub const WORKER_ID_ENV: &str = "PROCPOOL_WORKER_ID";

/// Worker id of the current process, if it was launched as a worker.
pub fn worker_id_from_env() -> Option<WorkerId> {
    std::env::var(WORKER_ID_ENV).ok()?.parse().ok()
}

/// Turn this process into a worker if it was launched as one.
///
/// Call this first thing in `main`, before parsing arguments. Returns
/// immediately in a normal process; in a worker it serves tasks from
/// `registry` over stdio and exits.
pub fn enter_if_worker(registry: &Registry) {
    let Some(worker) = worker_id_from_env() else {
        return;
    };

    // Pipe errors surface as io::Error instead of killing the worker.
    // SAFETY: replacing the SIGPIPE disposition before any other thread exists.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }
    crate::app::logging::init_worker_logging();

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    match serve(registry, stdin, stdout) {
        Ok(()) => {
            debug!(worker_id = worker, "Worker exiting");
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("Worker {} error: {}", worker, e);
            std::process::exit(1)
        }
    }
}

/// Run the worker loop over a line-oriented reader/writer pair.
///
/// Returns `Ok` on `shutdown`, on end of input, and when the manager side has
/// hung up. Malformed input is an error.
pub fn serve<R, W>(registry: &Registry, mut reader: R, mut writer: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    match serve_loop(registry, &mut reader, &mut writer) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn serve_loop<R: BufRead, W: Write>(
    registry: &Registry,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    send(writer, &WorkerMessage::Ready)?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let message = ManagerMessage::from_line(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        match message {
            ManagerMessage::Shutdown => return Ok(()),
            ManagerMessage::Task {
                index,
                function,
                argument,
            } => {
                trace!(index, function = %function, "Running task");
                let reply = match registry.invoke(&function, argument) {
                    Ok(value) => WorkerMessage::Result { index, value },
                    Err(message) => WorkerMessage::Failed { index, message },
                };
                send(writer, &reply)?;
            }
        }
    }
}

fn send<W: Write>(writer: &mut W, message: &WorkerMessage) -> io::Result<()> {
    let line = message.to_line()?;
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
