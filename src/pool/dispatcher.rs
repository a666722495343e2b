//! The manager loop.
//!
//! A single task owns the manager end of the hand-off channel, the pending
//! queue of the active batch and the state of every worker. It reacts to
//! three event sources: worker reports, control requests from the [`Pool`]
//! handle, and relays ending.
//!
//! [`Pool`]: super::Pool

use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, trace, warn};

use super::state::{
    ActiveBatch, BatchOutcome, BatchSummary, InFlight, PendingTask, PoolStatus, WorkerSlot,
    WorkerState, WorkerStatus,
};
use crate::channel::{duplex, Handoff, ManagerEnd, Report, Task, WorkerEnd};
use crate::config::{FailurePolicy, PoolConfig};
use crate::error::{PoolError, Result};
use crate::protocol::WorkerMessage;
use crate::subprocess::{Launcher, Termination};
use crate::worker::relay::{Relay, RelaySettings};
use crate::worker::WorkerId;

/// What the dispatcher tells a batch's stream.
#[derive(Debug)]
pub(crate) enum Completion {
    Value { index: usize, value: Value },
    Failed { index: usize, message: String },
    /// The batch cannot finish; no further completions follow.
    Aborted(PoolError),
}

pub(crate) struct Submission {
    pub id: u64,
    pub function: String,
    pub tasks: Vec<Task>,
    pub completions: mpsc::UnboundedSender<Completion>,
}

pub(crate) enum Control {
    Submit(Submission),
    Status(oneshot::Sender<PoolStatus>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct Dispatcher {
    processes: usize,
    max_tasks_per_worker: Option<usize>,
    failure_policy: FailurePolicy,
    relay_settings: RelaySettings,
    launcher: Arc<dyn Launcher>,
    channel: ManagerEnd,
    worker_end: WorkerEnd,
    generation: watch::Sender<u64>,
    control: mpsc::UnboundedReceiver<Control>,
    control_open: bool,
    workers: BTreeMap<WorkerId, WorkerSlot>,
    relays: JoinSet<(WorkerId, Termination)>,
    next_worker: WorkerId,
    batch: Option<ActiveBatch>,
    last_batch: Option<BatchSummary>,
    closing: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    spawned: usize,
    retired: usize,
    died: usize,
    /// Consecutive workers that exited before their first report, and the last of them.
    startup_failures: usize,
    last_startup_failure: Option<(WorkerId, Termination)>,
}

impl Dispatcher {
    /// Launch the configured number of workers.
    ///
    /// Fails if any worker cannot be launched; workers already started are
    /// torn down when the dispatcher is dropped.
    pub(crate) fn start(
        config: &PoolConfig,
        launcher: Arc<dyn Launcher>,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Result<Self> {
        let (channel, worker_end) = duplex();
        let (generation, _) = watch::channel(0u64);

        let mut dispatcher = Self {
            processes: config.processes,
            max_tasks_per_worker: config.max_tasks_per_worker,
            failure_policy: config.failure_policy,
            relay_settings: RelaySettings {
                handoff_timeout: config.handoff_timeout,
                shutdown_grace: config.shutdown_grace,
            },
            launcher,
            channel,
            worker_end,
            generation,
            control,
            control_open: true,
            workers: BTreeMap::new(),
            relays: JoinSet::new(),
            next_worker: 0,
            batch: None,
            last_batch: None,
            closing: false,
            shutdown_waiters: Vec::new(),
            spawned: 0,
            retired: 0,
            died: 0,
            startup_failures: 0,
            last_startup_failure: None,
        };

        for _ in 0..config.processes {
            dispatcher.spawn_worker()?;
        }
        info!(processes = config.processes, "Worker pool started");
        Ok(dispatcher)
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.closing && self.relays.is_empty() {
                break;
            }
            tokio::select! {
                Some(report) = self.channel.recv() => self.on_report(report).await,
                control = self.control.recv(), if self.control_open => match control {
                    Some(control) => self.on_control(control),
                    None => {
                        debug!("Pool handle dropped without shutdown");
                        self.control_open = false;
                        self.begin_shutdown();
                    }
                },
                Some(joined) = self.relays.join_next(), if !self.relays.is_empty() => {
                    self.on_relay_exit(joined)
                }
                else => break,
            }
        }

        self.channel.close();
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!(
            spawned = self.spawned,
            retired = self.retired,
            died = self.died,
            "Worker pool stopped"
        );
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Submit(submission) => self.submit(submission),
            Control::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Control::Shutdown(done) => {
                self.shutdown_waiters.push(done);
                self.begin_shutdown();
            }
        }
    }

    fn submit(&mut self, submission: Submission) {
        let Submission {
            id,
            function,
            tasks,
            completions,
        } = submission;

        if self.closing {
            let _ = completions.send(Completion::Aborted(PoolError::Closed));
            return;
        }

        if let Some(previous) = self.batch.take() {
            debug!(batch = previous.id, "Superseding unfinished batch");
            self.finish_batch(previous, BatchOutcome::Abandoned);
        }

        if let Some(error) = self.startup_error() {
            let _ = completions.send(Completion::Aborted(error));
            return;
        }

        if let Some(error) = self.replenish() {
            if self.active_workers() == 0 {
                let _ = completions.send(Completion::Aborted(error));
                return;
            }
        }

        info!(batch = id, function = %function, tasks = tasks.len(), "Batch submitted");
        self.batch = Some(ActiveBatch::new(id, function, tasks, completions));
        self.wake_parked();
    }

    async fn on_report(&mut self, report: Report) {
        let worker = report.worker;
        let Some(slot) = self.workers.get_mut(&worker) else {
            warn!(worker_id = worker, "Report from unknown worker");
            self.reply(worker, Handoff::Retire).await;
            return;
        };
        if !slot.reported {
            slot.reported = true;
            self.startup_failures = 0;
            self.last_startup_failure = None;
        }

        match report.message {
            WorkerMessage::Ready => trace!(worker_id = worker, "Worker ready"),
            WorkerMessage::Result { index, value } => {
                trace!(worker_id = worker, index, "Task completed");
                self.complete(worker, index, Completion::Value { index, value });
            }
            WorkerMessage::Failed { index, message } => {
                debug!(worker_id = worker, index, error = %message, "Task failed");
                self.complete(worker, index, Completion::Failed { index, message });
            }
        }

        let handoff = self.next_handoff(worker);
        self.reply(worker, handoff).await;
    }

    async fn reply(&mut self, worker: WorkerId, handoff: Handoff) {
        if let Err(e) = self.channel.reply(worker, handoff).await {
            warn!(worker_id = worker, error = %e, "Could not answer worker");
        }
    }

    /// Route a finished task to its batch, or drop it if the batch is gone.
    fn complete(&mut self, worker: WorkerId, index: usize, completion: Completion) {
        let Some(slot) = self.workers.get_mut(&worker) else {
            return;
        };
        let in_flight = match slot.in_flight.take() {
            Some(in_flight) if in_flight.task.index == index => in_flight,
            other => {
                slot.in_flight = other;
                warn!(worker_id = worker, index, "Result for a task the worker was not given");
                return;
            }
        };
        slot.state.record_completion();

        let Some(batch) = self.batch.as_mut().filter(|b| b.id == in_flight.batch) else {
            debug!(
                worker_id = worker,
                index,
                batch = in_flight.batch,
                "Discarding result of a finished batch"
            );
            return;
        };

        batch.outstanding -= 1;
        let delivered = batch.completions.send(completion).is_ok();
        let finished = batch.outstanding == 0;

        if !delivered {
            self.abandon_batch();
        } else if finished {
            if let Some(batch) = self.batch.take() {
                self.finish_batch(batch, BatchOutcome::Completed);
            }
        }
    }

    /// Decide what a worker that just reported should do next.
    fn next_handoff(&mut self, worker: WorkerId) -> Handoff {
        let Some(state) = self.workers.get(&worker).map(|slot| slot.state) else {
            return Handoff::Retire;
        };

        if self.closing {
            self.set_state(worker, WorkerState::Retiring);
            return Handoff::Retire;
        }
        if !state.is_active() {
            return Handoff::Retire;
        }
        if state.limit_reached(self.max_tasks_per_worker) {
            return self.replace(worker, state);
        }

        if self
            .batch
            .as_ref()
            .is_some_and(|batch| batch.completions.is_closed())
        {
            self.abandon_batch();
        }

        if let Some(batch) = self.batch.as_mut() {
            if let Some(PendingTask { task, attempt }) = batch.pending.pop_front() {
                batch.engaged.insert(worker);
                debug!(
                    worker_id = worker,
                    index = task.index,
                    batch = batch.id,
                    attempt,
                    "Dispatching task"
                );
                if let Some(slot) = self.workers.get_mut(&worker) {
                    slot.in_flight = Some(InFlight {
                        batch: batch.id,
                        task: task.clone(),
                        attempt,
                    });
                }
                return Handoff::Task(task);
            }
        }

        Handoff::Park {
            generation: *self.generation.borrow(),
        }
    }

    /// Retire a worker that reached its task limit and start its successor.
    fn replace(&mut self, worker: WorkerId, state: WorkerState) -> Handoff {
        info!(worker_id = worker, %state, "Worker reached its task limit");
        let next = match self.spawn_worker() {
            Ok(by) => WorkerState::Replaced { by },
            Err(e) => {
                warn!(worker_id = worker, error = %e, "Could not start replacement worker");
                WorkerState::Retiring
            }
        };
        self.set_state(worker, next);
        Handoff::Retire
    }

    fn on_relay_exit(&mut self, joined: std::result::Result<(WorkerId, Termination), JoinError>) {
        let (worker, termination) = match joined {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "Relay task aborted");
                return;
            }
        };
        let Some(slot) = self.workers.remove(&worker) else {
            return;
        };

        match slot.state {
            WorkerState::Active { .. } if !slot.reported => {
                self.died += 1;
                self.startup_failures += 1;
                self.last_startup_failure = Some((worker, termination));
                warn!(
                    worker_id = worker,
                    pid = slot.pid,
                    %termination,
                    failures = self.startup_failures,
                    "Worker exited before reporting ready"
                );
            }
            WorkerState::Active { completed } => {
                self.died += 1;
                warn!(
                    worker_id = worker,
                    pid = slot.pid,
                    completed,
                    %termination,
                    "Worker exited unexpectedly"
                );
                if let Some(in_flight) = slot.in_flight {
                    self.recover(worker, in_flight, termination);
                }
            }
            WorkerState::Retiring | WorkerState::Replaced { .. } => {
                self.retired += 1;
                debug!(worker_id = worker, %termination, "Worker retired");
            }
        }

        if self.closing {
            return;
        }
        if let Some(error) = self.startup_error() {
            self.fail_batch(error);
        } else if let Some(error) = self.replenish() {
            if self.active_workers() == 0 {
                self.fail_batch(error);
            }
        }
    }

    /// Once as many workers in a row as the pool holds have died before
    /// reporting ready, the worker program is taken to be broken: the pool
    /// stops starting new ones and every batch fails with this error.
    fn startup_error(&self) -> Option<PoolError> {
        if self.startup_failures < self.processes {
            return None;
        }
        let (worker, termination) = self.last_startup_failure?;
        Some(PoolError::Launch {
            worker,
            source: std::io::Error::other(format!(
                "worker exited before reporting ready ({})",
                termination
            )),
        })
    }

    /// Apply the failure policy to the task a dead worker was running.
    fn recover(&mut self, worker: WorkerId, in_flight: InFlight, termination: Termination) {
        let index = in_flight.task.index;
        let Some(batch) = self.batch.as_mut().filter(|b| b.id == in_flight.batch) else {
            return;
        };

        match self.failure_policy {
            FailurePolicy::Redispatch { max_attempts } if in_flight.attempt < max_attempts => {
                info!(
                    worker_id = worker,
                    index,
                    batch = batch.id,
                    attempt = in_flight.attempt + 1,
                    "Re-dispatching task after worker death"
                );
                batch.pending.push_front(PendingTask {
                    task: in_flight.task,
                    attempt: in_flight.attempt + 1,
                });
                self.wake_parked();
            }
            _ => self.fail_batch(PoolError::WorkerDied {
                worker,
                index,
                termination,
            }),
        }
    }

    /// Start workers until the pool is back at full size.
    ///
    /// Returns the launch error if the pool is still short.
    fn replenish(&mut self) -> Option<PoolError> {
        while self.active_workers() < self.processes {
            if let Err(e) = self.spawn_worker() {
                warn!(error = %e, active = self.active_workers(), "Could not refill worker pool");
                return Some(e);
            }
        }
        None
    }

    fn spawn_worker(&mut self) -> Result<WorkerId> {
        let id = self.next_worker;
        self.next_worker += 1;

        let io = self
            .launcher
            .launch(id)
            .map_err(|source| PoolError::Launch { worker: id, source })?;
        let pid = io.process.pid();

        let relay = Relay::new(
            id,
            io,
            self.worker_end.clone(),
            self.generation.subscribe(),
            self.relay_settings,
        );
        self.relays.spawn(async move {
            let termination = AssertUnwindSafe(relay.run())
                .catch_unwind()
                .await
                .unwrap_or(Termination::Unknown);
            (id, termination)
        });

        self.workers.insert(id, WorkerSlot::new(pid));
        self.spawned += 1;
        debug!(worker_id = id, pid, "Worker started");
        Ok(id)
    }

    fn begin_shutdown(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.abandon_batch();
        info!(workers = self.workers.len(), "Shutting down worker pool");
        self.wake_parked();
    }

    fn fail_batch(&mut self, error: PoolError) {
        if let Some(batch) = self.batch.take() {
            warn!(batch = batch.id, error = %error, "Batch failed");
            let _ = batch.completions.send(Completion::Aborted(error));
            self.finish_batch(batch, BatchOutcome::Failed);
        }
    }

    fn abandon_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.finish_batch(batch, BatchOutcome::Abandoned);
        }
    }

    fn finish_batch(&mut self, batch: ActiveBatch, outcome: BatchOutcome) {
        let summary = batch.summary(outcome);
        info!(
            batch = summary.id,
            function = %summary.function,
            tasks = summary.tasks,
            completed = summary.completed,
            engaged_workers = summary.engaged_workers,
            outcome = ?summary.outcome,
            elapsed = ?summary.elapsed,
            "Batch finished"
        );
        self.last_batch = Some(summary);
    }

    fn wake_parked(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    fn set_state(&mut self, worker: WorkerId, state: WorkerState) {
        if let Some(slot) = self.workers.get_mut(&worker) {
            slot.state = state;
        }
    }

    fn active_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.state.is_active())
            .count()
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            processes: self.processes,
            workers: self
                .workers
                .iter()
                .map(|(id, slot)| WorkerStatus {
                    id: *id,
                    pid: slot.pid,
                    state: slot.state,
                    busy: slot.in_flight.is_some(),
                })
                .collect(),
            spawned: self.spawned,
            retired: self.retired,
            died: self.died,
            closing: self.closing,
            last_batch: self
                .batch
                .as_ref()
                .map(|batch| batch.summary(BatchOutcome::Running))
                .or_else(|| self.last_batch.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::ThreadLauncher;
    use crate::worker::{Registry, TaskFn};
    use serde_json::json;
    use std::time::Duration;

    struct Double;

    impl TaskFn for Double {
        const NAME: &'static str = "double";
        type Input = u64;
        type Output = u64;

        fn call(&self, input: u64) -> anyhow::Result<u64> {
            Ok(input * 2)
        }
    }

    fn start(policy: FailurePolicy) -> (Dispatcher, mpsc::UnboundedSender<Control>) {
        let mut registry = Registry::new();
        registry.register(Double);
        let launcher = Arc::new(ThreadLauncher::new(Arc::new(registry)));
        let config = PoolConfig {
            handoff_timeout: Duration::from_millis(30),
            ..PoolConfig::default()
                .with_processes(1)
                .with_failure_policy(policy)
        };
        let (control, control_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::start(&config, launcher, control_rx).unwrap();
        (dispatcher, control)
    }

    fn submit(dispatcher: &mut Dispatcher) -> mpsc::UnboundedReceiver<Completion> {
        let (completions, results) = mpsc::unbounded_channel();
        dispatcher.submit(Submission {
            id: 1,
            function: "double".to_string(),
            tasks: vec![Task {
                index: 0,
                function: "double".to_string(),
                argument: json!(5),
            }],
            completions,
        });
        results
    }

    /// Answer the worker's `ready` only after its relay has given up waiting,
    /// then collect the relay's exit.
    async fn answer_too_late(dispatcher: &mut Dispatcher) {
        let report = dispatcher.channel.recv().await.unwrap();
        assert_eq!(report.message, WorkerMessage::Ready);
        tokio::time::sleep(Duration::from_millis(150)).await;

        dispatcher.on_report(report).await;
        assert!(dispatcher.workers[&0].in_flight.is_some());

        let joined = tokio::time::timeout(Duration::from_secs(5), dispatcher.relays.join_next())
            .await
            .expect("relay did not end after its deadline")
            .expect("no relay running");
        assert_eq!(joined.as_ref().unwrap(), &(0, Termination::Exited(0)));
        dispatcher.on_relay_exit(joined);
    }

    #[tokio::test]
    async fn test_expired_hand_off_counts_as_worker_death() {
        let (mut dispatcher, _control) = start(FailurePolicy::FailBatch);
        let mut results = submit(&mut dispatcher);

        answer_too_late(&mut dispatcher).await;

        match results.try_recv().unwrap() {
            Completion::Aborted(PoolError::WorkerDied {
                worker,
                index,
                termination,
            }) => {
                assert_eq!(worker, 0);
                assert_eq!(index, 0);
                assert_eq!(termination, Termination::Exited(0));
            }
            other => panic!("Expected worker death, got {:?}", other),
        }
        let status = dispatcher.status();
        assert_eq!(status.died, 1);
        assert_eq!(status.active_workers(), 1);
        assert_eq!(status.last_batch.unwrap().outcome, BatchOutcome::Failed);
    }

    #[tokio::test]
    async fn test_expired_hand_off_redispatches_task() {
        let policy = FailurePolicy::Redispatch { max_attempts: 2 };
        let (mut dispatcher, _control) = start(policy);
        let mut results = submit(&mut dispatcher);

        answer_too_late(&mut dispatcher).await;

        assert!(results.try_recv().is_err());
        let batch = dispatcher.batch.as_ref().unwrap();
        let retry = batch.pending.front().unwrap();
        assert_eq!(retry.task.index, 0);
        assert_eq!(retry.attempt, 2);
        assert_eq!(dispatcher.status().died, 1);
    }

    #[tokio::test]
    async fn test_worker_reporting_clears_startup_failures() {
        let (mut dispatcher, _control) = start(FailurePolicy::FailBatch);
        dispatcher.startup_failures = 1;
        dispatcher.last_startup_failure = Some((7, Termination::Exited(1)));
        assert!(matches!(
            dispatcher.startup_error(),
            Some(PoolError::Launch { worker: 7, .. })
        ));

        let report = dispatcher.channel.recv().await.unwrap();
        dispatcher.on_report(report).await;

        assert!(dispatcher.workers[&0].reported);
        assert!(dispatcher.startup_error().is_none());
    }
}
