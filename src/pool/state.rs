//! Manager-side bookkeeping for workers and batches.

use crate::channel::Task;
use crate::worker::WorkerId;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::dispatcher::Completion;

/// Lifecycle of a worker as the manager sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Accepting tasks.
    Active { completed: usize },
    /// Told to shut down, no replacement.
    Retiring,
    /// Reached its task limit; `by` took its place.
    Replaced { by: WorkerId },
}

impl WorkerState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Record one finished task. Only active workers count.
    pub(crate) fn record_completion(&mut self) {
        if let Self::Active { completed } = self {
            *completed += 1;
        }
    }

    pub(crate) fn limit_reached(&self, limit: Option<usize>) -> bool {
        match (self, limit) {
            (Self::Active { completed }, Some(limit)) => *completed >= limit,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active { completed } => write!(f, "active ({} completed)", completed),
            Self::Retiring => write!(f, "retiring"),
            Self::Replaced { by } => write!(f, "replaced by worker {}", by),
        }
    }
}

/// A task handed out and not yet answered.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub batch: u64,
    pub task: Task,
    pub attempt: u32,
}

#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub in_flight: Option<InFlight>,
    /// Set once the worker's first report reached the dispatcher.
    pub reported: bool,
}

impl WorkerSlot {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            state: WorkerState::Active { completed: 0 },
            pid,
            in_flight: None,
            reported: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingTask {
    pub task: Task,
    pub attempt: u32,
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Still being dispatched.
    Running,
    Completed,
    /// The caller stopped reading or a newer batch replaced it.
    Abandoned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub id: u64,
    pub function: String,
    pub tasks: usize,
    pub completed: usize,
    /// Distinct workers that ran at least one task of the batch
    pub engaged_workers: usize,
    pub outcome: BatchOutcome,
    pub elapsed: Duration,
}

/// One `map` call as the dispatcher tracks it.
pub(crate) struct ActiveBatch {
    pub id: u64,
    pub function: String,
    pub pending: VecDeque<PendingTask>,
    pub tasks: usize,
    pub outstanding: usize,
    pub engaged: BTreeSet<WorkerId>,
    pub completions: mpsc::UnboundedSender<Completion>,
    pub started: Instant,
}

impl ActiveBatch {
    pub fn new(
        id: u64,
        function: String,
        tasks: Vec<Task>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        let count = tasks.len();
        Self {
            id,
            function,
            pending: tasks
                .into_iter()
                .map(|task| PendingTask { task, attempt: 1 })
                .collect(),
            tasks: count,
            outstanding: count,
            engaged: BTreeSet::new(),
            completions,
            started: Instant::now(),
        }
    }

    pub fn summary(&self, outcome: BatchOutcome) -> BatchSummary {
        BatchSummary {
            id: self.id,
            function: self.function.clone(),
            tasks: self.tasks,
            completed: self.tasks - self.outstanding,
            engaged_workers: self.engaged.len(),
            outcome,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Live worker as reported by [`Pool::status`](super::Pool::status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured pool size
    pub processes: usize,
    pub workers: Vec<WorkerStatus>,
    pub spawned: usize,
    pub retired: usize,
    pub died: usize,
    pub closing: bool,
    pub last_batch: Option<BatchSummary>,
}

impl PoolStatus {
    /// Workers still accepting tasks.
    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_counting_and_limit() {
        let mut state = WorkerState::Active { completed: 0 };
        assert!(!state.limit_reached(Some(2)));
        state.record_completion();
        state.record_completion();
        assert_eq!(state, WorkerState::Active { completed: 2 });
        assert!(state.limit_reached(Some(2)));
        assert!(!state.limit_reached(None));
    }

    #[test]
    fn test_retired_states_do_not_count() {
        let mut state = WorkerState::Replaced { by: 4 };
        state.record_completion();
        assert_eq!(state, WorkerState::Replaced { by: 4 });
        assert!(!state.limit_reached(Some(0)));
        assert!(!state.is_active());
        assert_eq!(state.to_string(), "replaced by worker 4");
    }

    #[test]
    fn test_batch_summary_counts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tasks = (0..3)
            .map(|index| Task {
                index,
                function: "f".to_string(),
                argument: json!(index),
            })
            .collect();
        let mut batch = ActiveBatch::new(7, "f".to_string(), tasks, tx);
        assert_eq!(batch.pending.len(), 3);
        assert!(batch.pending.iter().all(|p| p.attempt == 1));

        batch.outstanding -= 1;
        batch.engaged.insert(0);
        let summary = batch.summary(BatchOutcome::Abandoned);
        assert_eq!(summary.id, 7);
        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.engaged_workers, 1);
        assert_eq!(summary.outcome, BatchOutcome::Abandoned);
    }
}
