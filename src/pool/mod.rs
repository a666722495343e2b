//! The process pool.
//!
//! A [`Pool`] keeps a fixed number of worker processes alive and maps task
//! functions over inputs with them. Results come back in input order through
//! a [`MapStream`], however the workers finish.
//!
//! # Example
//!
//! ```ignore
//! use procpool::{Pool, PoolConfig};
//!
//! let mut pool = Pool::new(PoolConfig::default().with_processes(2))?;
//! let factorials = pool.map_collect(&Factorial, vec![1, 2, 3, 4, 5]).await?;
//! assert_eq!(factorials, vec![1, 2, 6, 24, 120]);
//! pool.shutdown().await?;
//! ```

pub mod buffer;
pub(crate) mod dispatcher;
pub mod state;
pub mod stream;

pub use state::{BatchOutcome, BatchSummary, PoolStatus, WorkerState, WorkerStatus};
pub use stream::MapStream;

use futures::TryStreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::Task;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::subprocess::{Launcher, ProcessLauncher};
use crate::worker::TaskFn;
use dispatcher::{Control, Dispatcher, Submission};

pub struct Pool {
    control: mpsc::UnboundedSender<Control>,
    dispatcher: Option<JoinHandle<()>>,
    processes: usize,
    next_batch: u64,
}

impl Pool {
    /// Start a pool whose workers are processes of the configured program.
    ///
    /// The program must call [`enter_if_worker`](crate::worker::enter_if_worker)
    /// with a registry holding every function the pool will map. Must be
    /// called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let launcher = ProcessLauncher::from_config(&config)?;
        Self::with_launcher(config, Arc::new(launcher))
    }

    /// Start a pool whose workers come from `launcher`.
    pub fn with_launcher(config: PoolConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(std::io::Error::other)?;

        let (control, control_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::start(&config, launcher, control_rx)?;
        let handle = runtime.spawn(dispatcher.run());

        Ok(Self {
            control,
            dispatcher: Some(handle),
            processes: config.processes,
            next_batch: 0,
        })
    }

    /// Configured number of worker processes.
    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Apply `function` to every argument on the workers.
    ///
    /// The function runs in the worker processes under its registered name;
    /// the value passed here only selects it. Results are yielded in
    /// argument order. The stream borrows the pool, so calls are sequential.
    pub fn map<F, I>(&mut self, _function: &F, arguments: I) -> MapStream<'_, F::Output>
    where
        F: TaskFn,
        I: IntoIterator<Item = F::Input>,
    {
        let mut tasks = Vec::new();
        for (index, argument) in arguments.into_iter().enumerate() {
            match serde_json::to_value(argument) {
                Ok(argument) => tasks.push(Task {
                    index,
                    function: F::NAME.to_string(),
                    argument,
                }),
                Err(source) => return MapStream::failed(PoolError::Encode { index, source }),
            }
        }

        let (completions, completions_rx) = mpsc::unbounded_channel();
        let count = tasks.len();
        if count == 0 {
            return MapStream::new(0, completions_rx);
        }

        self.next_batch += 1;
        let submission = Submission {
            id: self.next_batch,
            function: F::NAME.to_string(),
            tasks,
            completions,
        };
        if self.control.send(Control::Submit(submission)).is_err() {
            return MapStream::failed(PoolError::Closed);
        }
        debug!(batch = self.next_batch, function = F::NAME, tasks = count, "Submitted map");
        MapStream::new(count, completions_rx)
    }

    /// Like [`map`](Self::map), collecting into a `Vec` and failing on the
    /// first error.
    pub async fn map_collect<F, I>(&mut self, function: &F, arguments: I) -> Result<Vec<F::Output>>
    where
        F: TaskFn,
        I: IntoIterator<Item = F::Input>,
    {
        self.map(function, arguments).try_collect().await
    }

    /// Snapshot of the workers and the most recent batch.
    pub async fn status(&self) -> Result<PoolStatus> {
        let (reply, status) = oneshot::channel();
        self.control
            .send(Control::Status(reply))
            .map_err(|_| PoolError::Closed)?;
        status.await.map_err(|_| PoolError::Closed)
    }

    /// Retire every worker and wait until all of them have exited.
    pub async fn shutdown(mut self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.control
            .send(Control::Shutdown(done))
            .map_err(|_| PoolError::Closed)?;
        finished.await.map_err(|_| PoolError::Closed)?;

        if let Some(handle) = self.dispatcher.take() {
            handle
                .await
                .map_err(|e| PoolError::Protocol(format!("dispatcher failed: {}", e)))?;
        }
        Ok(())
    }
}
